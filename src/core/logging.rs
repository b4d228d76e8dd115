//! Diagnostic logging setup.
//!
//! Subprocess stdout belongs to the chunk stream, so every log line goes to
//! stderr or to a file, never to stdout.

use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_LEVEL_ENV: &str = "AGENTBRIDGE_LOG";
const LOG_FORMAT_ENV: &str = "AGENTBRIDGE_LOG_FORMAT";
const LOG_FILE_ENV: &str = "AGENTBRIDGE_LOG_FILE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event.
    Json,
    Compact,
}

impl LogFormat {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a level name; `verbose` and `warning` are accepted aliases.
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Effective logging settings for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Merge CLI flags with the `AGENTBRIDGE_LOG*` environment.
    ///
    /// An explicit `--log-level` beats the env var; `--json-output` forces
    /// JSON; `--verbose` raises a quiet level to debug.
    #[must_use]
    pub fn resolve(cli_level: Option<&str>, json_output: bool, verbose: bool) -> Self {
        let level = cli_level
            .and_then(LogLevel::from_arg)
            .or_else(parse_log_level_from_env)
            .unwrap_or_default();
        let level = if verbose && matches!(level, LogLevel::Warn | LogLevel::Error) {
            LogLevel::Debug
        } else {
            level
        };
        let format = if json_output {
            LogFormat::Json
        } else {
            parse_log_format_from_env().unwrap_or_default()
        };
        Self {
            level,
            format,
            file: parse_log_file_from_env(),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn parse_log_level_from_env() -> Option<LogLevel> {
    non_empty_env(LOG_LEVEL_ENV).and_then(|v| LogLevel::from_arg(&v))
}

#[must_use]
pub fn parse_log_format_from_env() -> Option<LogFormat> {
    non_empty_env(LOG_FORMAT_ENV).and_then(|v| LogFormat::from_arg(&v))
}

#[must_use]
pub fn parse_log_file_from_env() -> Option<PathBuf> {
    non_empty_env(LOG_FILE_ENV).map(PathBuf::from)
}

/// Install the global subscriber. Later calls are ignored.
///
/// `RUST_LOG` overrides the level; an unopenable log file falls back to
/// stderr.
pub fn init(settings: &LogSettings) {
    let writer = settings
        .file
        .as_ref()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
        .map_or_else(|| BoxMakeWriter::new(std::io::stderr), BoxMakeWriter::new);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("agentbridge={}", settings.level.as_filter()))
    });

    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    let layer = match settings.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Human => layer.with_target(false).without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[allow(unsafe_code)]
    fn with_env(vars: &[(&str, &str)], f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prior: Vec<_> = vars.iter().map(|(k, _)| (*k, std::env::var(k).ok())).collect();
        for (key, value) in vars {
            unsafe { std::env::set_var(key, value) };
        }
        f();
        for (key, value) in prior {
            match value {
                Some(v) => unsafe { std::env::set_var(key, v) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }

    #[test]
    fn env_var_log_level_parsing() {
        with_env(&[(LOG_LEVEL_ENV, "trace")], || {
            assert_eq!(parse_log_level_from_env(), Some(LogLevel::Trace));
        });
        with_env(&[(LOG_LEVEL_ENV, "  ")], || {
            assert_eq!(parse_log_level_from_env(), None);
        });
    }

    #[test]
    fn env_var_log_format_parsing() {
        with_env(&[(LOG_FORMAT_ENV, "JSON")], || {
            assert_eq!(parse_log_format_from_env(), Some(LogFormat::Json));
        });
        with_env(&[(LOG_FORMAT_ENV, "yaml")], || {
            assert_eq!(parse_log_format_from_env(), None);
        });
    }

    #[test]
    fn env_level_applies_without_cli_flag() {
        with_env(&[(LOG_LEVEL_ENV, "info"), (LOG_FORMAT_ENV, "compact")], || {
            let settings = LogSettings::resolve(None, false, false);
            assert_eq!(settings.level, LogLevel::Info);
            assert_eq!(settings.format, LogFormat::Compact);
        });
    }

    #[test]
    fn cli_flags_beat_env() {
        with_env(&[(LOG_LEVEL_ENV, "info"), (LOG_FORMAT_ENV, "compact")], || {
            let settings = LogSettings::resolve(Some("error"), true, false);
            assert_eq!(settings.level, LogLevel::Error);
            assert_eq!(settings.format, LogFormat::Json);
        });
    }

    #[test]
    fn verbose_raises_quiet_levels_only() {
        with_env(&[(LOG_LEVEL_ENV, "trace")], || {
            assert_eq!(LogSettings::resolve(None, false, true).level, LogLevel::Trace);
            assert_eq!(
                LogSettings::resolve(Some("warn"), false, true).level,
                LogLevel::Debug
            );
        });
    }
}
