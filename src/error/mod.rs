//! Error types for agentbridge.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into five main categories:
//! - **Authentication**: No usable credential for a provider
//! - **Environment**: Missing agent binaries, failed shell probes
//! - **Process**: Subprocesses that fail to start or time out
//! - **Configuration**: Config file parsing, unknown providers, empty registry
//! - **Internal**: I/O and serialization failures, unclassified issues
//!
//! Each error has a stable error code (e.g., `AB-E001`) for programmatic handling.
//!
//! Note that most session-level failures never become a `BridgeError`: the
//! chat path reports them in-band as `error`/`auth-error` chunks so the
//! consumer always reaches a terminal `finish`.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No usable credential.
    Authentication,
    /// Missing binaries, broken shell environment.
    Environment,
    /// Subprocess spawn failures and probe timeouts.
    Process,
    /// Config parsing, validation, unknown providers.
    Configuration,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Environment => "Environment error",
            Self::Process => "Process error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Environment => "E",
            Self::Process => "P",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the `agentbridge` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Agent binary not found
    BinaryNotFound = 2,
    /// Config errors, unknown provider
    ConfigError = 3,
    /// Timeout
    Timeout = 4,
    /// Missing credentials
    AuthError = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

/// Main error type for agentbridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// No credential could be resolved for the provider.
    #[error("no credentials found for {provider}")]
    AuthNotConfigured { provider: String },

    // ==========================================================================
    // Environment errors (Category: Environment)
    // ==========================================================================
    /// The provider's agent binary could not be located.
    #[error("{provider} CLI not found")]
    BinaryNotFound { provider: String },

    /// The login-shell environment probe failed.
    #[error("shell environment probe failed: {reason}")]
    ShellProbe { reason: String },

    // ==========================================================================
    // Process errors (Category: Process)
    // ==========================================================================
    /// A subprocess could not be started.
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    /// A chat session ended with an in-band error.
    #[error("{provider} session failed: {message}")]
    SessionFailed {
        provider: String,
        message: String,
        auth: bool,
    },

    /// A time-bounded subprocess probe exceeded its limit.
    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid { key: String, message: String },

    /// Provider id is not registered.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The provider registry has no providers at all.
    #[error("no providers registered")]
    NoProviders,

    // ==========================================================================
    // Internal errors (Category: Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML deserialization failed.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    /// Map error to a process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::BinaryNotFound { .. } => ExitCode::BinaryNotFound,
            Self::AuthNotConfigured { .. } | Self::SessionFailed { auth: true, .. } => {
                ExitCode::AuthError
            }
            Self::Timeout { .. } => ExitCode::Timeout,
            Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::UnknownProvider(_)
            | Self::NoProviders
            | Self::Toml(_) => ExitCode::ConfigError,
            Self::ShellProbe { .. }
            | Self::SpawnFailed { .. }
            | Self::SessionFailed { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthNotConfigured { .. } => ErrorCategory::Authentication,
            Self::BinaryNotFound { .. } | Self::ShellProbe { .. } => ErrorCategory::Environment,
            Self::SessionFailed { auth: true, .. } => ErrorCategory::Authentication,
            Self::SpawnFailed { .. } | Self::SessionFailed { .. } | Self::Timeout { .. } => {
                ErrorCategory::Process
            }
            Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::UnknownProvider(_)
            | Self::NoProviders
            | Self::Toml(_) => ErrorCategory::Configuration,
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `AB-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthNotConfigured { .. } => "AB-A001",
            Self::SessionFailed { auth: true, .. } => "AB-A002",

            Self::BinaryNotFound { .. } => "AB-E001",
            Self::ShellProbe { .. } => "AB-E002",

            Self::SpawnFailed { .. } => "AB-P001",
            Self::Timeout { .. } => "AB-P002",
            Self::SessionFailed { .. } => "AB-P003",

            Self::ConfigParse { .. } => "AB-C001",
            Self::ConfigInvalid { .. } => "AB-C002",
            Self::UnknownProvider(_) => "AB-C010",
            Self::NoProviders => "AB-C011",
            Self::Toml(_) => "AB-C012",

            Self::Io(_) => "AB-X001",
            Self::Json(_) => "AB-X002",
            Self::Other(_) => "AB-X099",
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ShellProbe { .. })
    }

    /// A one-line, copy-paste oriented hint for the user, when one exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::BinaryNotFound { provider } => Some(match provider.as_str() {
                "codex" => "Install with: npm install -g @openai/codex".to_string(),
                "claude" => "Install with: npm install -g @anthropic-ai/claude-code".to_string(),
                other => format!("Install the {other} CLI or set AGENTBRIDGE_{}_BIN", other.to_uppercase()),
            }),
            Self::AuthNotConfigured { provider }
            | Self::SessionFailed {
                provider,
                auth: true,
                ..
            } => Some(match provider.as_str() {
                "codex" => "Run: codex login (or set OPENAI_API_KEY)".to_string(),
                "claude" => "Run: claude /login (or set ANTHROPIC_API_KEY)".to_string(),
                other => format!("Log in with the {other} CLI"),
            }),
            Self::UnknownProvider(_) => Some("Run: agentbridge status".to_string()),
            Self::ConfigParse { path, .. } => Some(format!("Fix or remove {path}")),
            _ => None,
        }
    }
}

/// Result type alias for agentbridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_not_found_maps_to_environment() {
        let err = BridgeError::BinaryNotFound {
            provider: "codex".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Environment);
        assert_eq!(err.exit_code(), ExitCode::BinaryNotFound);
        assert_eq!(err.error_code(), "AB-E001");
        assert!(err.hint().unwrap().contains("@openai/codex"));
    }

    #[test]
    fn error_codes_carry_category_prefix() {
        let cases = [
            BridgeError::AuthNotConfigured {
                provider: "claude".into(),
            },
            BridgeError::Timeout {
                program: "zsh".into(),
                seconds: 5,
            },
            BridgeError::UnknownProvider("x".into()),
            BridgeError::SessionFailed {
                provider: "codex".into(),
                message: "401".into(),
                auth: true,
            },
            BridgeError::SessionFailed {
                provider: "codex".into(),
                message: "exit 1".into(),
                auth: false,
            },
            BridgeError::Io(std::io::Error::other("boom")),
        ];
        for err in cases {
            let prefix = format!("AB-{}", err.category().code_prefix());
            assert!(
                err.error_code().starts_with(&prefix),
                "{} should start with {prefix}",
                err.error_code()
            );
        }
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(
            BridgeError::Timeout {
                program: "npm".into(),
                seconds: 5
            }
            .is_retryable()
        );
        assert!(!BridgeError::NoProviders.is_retryable());
    }

    #[test]
    fn session_auth_failure_exits_with_auth_code() {
        let err = BridgeError::SessionFailed {
            provider: "claude".into(),
            message: "Invalid API key".into(),
            auth: true,
        };
        assert_eq!(err.exit_code(), ExitCode::AuthError);
        assert!(err.hint().unwrap().contains("/login"));
    }

    #[test]
    fn exit_code_converts_to_i32() {
        assert_eq!(i32::from(ExitCode::AuthError), 5);
        assert_eq!(i32::from(ExitCode::Success), 0);
    }
}
