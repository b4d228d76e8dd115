//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux: `~/.config/agentbridge/config.toml`
//! - macOS: `~/Library/Application Support/dev.agentbridge.agentbridge/config.toml`
//! - Windows: `%APPDATA%/agentbridge/agentbridge/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `AGENTBRIDGE_CONFIG`: Override config file path
//! - `AGENTBRIDGE_DEFAULT_PROVIDER`: Provider used when none is named
//! - `AGENTBRIDGE_PROBE_TIMEOUT`: Upper bound for helper probes, in seconds
//! - `AGENTBRIDGE_BUNDLED_BIN_DIR`: Directory holding bundled agent binaries
//! - `AGENTBRIDGE_<ID>_BIN`: Explicit binary path for provider `<id>`

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::shell_env::EnvMap;
use crate::error::{BridgeError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "AGENTBRIDGE_CONFIG";
/// Environment variable for the default provider id.
pub const ENV_DEFAULT_PROVIDER: &str = "AGENTBRIDGE_DEFAULT_PROVIDER";
/// Environment variable for the probe timeout in seconds.
pub const ENV_PROBE_TIMEOUT: &str = "AGENTBRIDGE_PROBE_TIMEOUT";
/// Environment variable for the bundled binary directory.
pub const ENV_BUNDLED_BIN_DIR: &str = "AGENTBRIDGE_BUNDLED_BIN_DIR";

/// Default probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
/// Default chunk channel capacity per session.
pub const DEFAULT_STREAM_BUFFER: usize = 32;

const MAX_PROBE_TIMEOUT_SECS: u64 = 60;
const MAX_STREAM_BUFFER: usize = 4096;

/// Name of the per-provider binary override variable, e.g. `AGENTBRIDGE_CODEX_BIN`.
#[must_use]
pub fn binary_env_var(provider_id: &str) -> String {
    let id: String = provider_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("AGENTBRIDGE_{id}_BIN")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Config File
// =============================================================================

/// Application configuration, as stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Per-provider settings keyed by provider id.
    pub providers: BTreeMap<String, ProviderSettings>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Provider used when a caller does not name one.
    pub default_provider: Option<String>,
    /// Upper bound for shell, `which` and package-manager probes.
    pub probe_timeout_secs: u64,
    /// Directory holding `<os>-<arch>/<binary>` bundled agents.
    pub bundled_bin_dir: Option<PathBuf>,
    /// Chunk channel capacity per session.
    pub stream_buffer: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            bundled_bin_dir: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

/// Settings for a specific provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Explicit path to the agent binary.
    pub binary_path: Option<PathBuf>,
    /// Extra child environment. An empty value removes the variable.
    pub env: EnvMap,
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BridgeError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or the file written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| BridgeError::ConfigInvalid {
            key: "<root>".to_string(),
            message: e.to_string(),
        })?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// The config file path, honoring `AGENTBRIDGE_CONFIG`.
    #[must_use]
    pub fn config_path() -> PathBuf {
        non_empty_env(ENV_CONFIG).map_or_else(|| AppPaths::new().config_file(), PathBuf::from)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns error if the probe timeout or stream buffer is out of range,
    /// or a provider env key is empty or contains `=`.
    pub fn validate(&self) -> Result<()> {
        let timeout = self.general.probe_timeout_secs;
        if timeout == 0 || timeout > MAX_PROBE_TIMEOUT_SECS {
            return Err(BridgeError::ConfigInvalid {
                key: "general.probe_timeout_secs".to_string(),
                message: format!("must be between 1 and {MAX_PROBE_TIMEOUT_SECS}"),
            });
        }

        let buffer = self.general.stream_buffer;
        if buffer == 0 || buffer > MAX_STREAM_BUFFER {
            return Err(BridgeError::ConfigInvalid {
                key: "general.stream_buffer".to_string(),
                message: format!("must be between 1 and {MAX_STREAM_BUFFER}"),
            });
        }

        for (id, settings) in &self.providers {
            if let Some(bad) = settings
                .env
                .keys()
                .find(|k| k.is_empty() || k.contains('='))
            {
                return Err(BridgeError::ConfigInvalid {
                    key: format!("providers.{id}.env"),
                    message: format!("invalid variable name {bad:?}"),
                });
            }
        }

        Ok(())
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Values given on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub default_provider: Option<String>,
    pub probe_timeout_secs: Option<u64>,
    pub bundled_bin_dir: Option<PathBuf>,
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub default_provider: ConfigSource,
    pub probe_timeout: ConfigSource,
    pub bundled_bin_dir: ConfigSource,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Preferred default provider id, if any layer named one.
    pub default_provider: Option<String>,
    /// Upper bound for helper probes.
    pub probe_timeout: Duration,
    /// Bundled binary directory.
    pub bundled_bin_dir: Option<PathBuf>,
    /// Chunk channel capacity per session.
    pub stream_buffer: usize,
    /// Per-provider file settings.
    pub providers: BTreeMap<String, ProviderSettings>,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self::from_parts(&CliOverrides::default(), Config::default())
    }
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI overrides, environment variables,
    /// and the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but is invalid, or if an
    /// environment value cannot be parsed.
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let config = Config::load()?;
        config.validate()?;
        Self::merge(cli, config)
    }

    /// Merge already-loaded file config with CLI flags and env vars.
    ///
    /// # Errors
    ///
    /// Returns an error if `AGENTBRIDGE_PROBE_TIMEOUT` is set but not a
    /// positive integer.
    pub fn merge(cli: &CliOverrides, config: Config) -> Result<Self> {
        if let Some(raw) = non_empty_env(ENV_PROBE_TIMEOUT) {
            match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => {}
                _ => {
                    return Err(BridgeError::ConfigInvalid {
                        key: ENV_PROBE_TIMEOUT.to_string(),
                        message: format!("expected a positive integer, got {raw:?}"),
                    });
                }
            }
        }
        Ok(Self::from_parts(cli, config))
    }

    fn from_parts(cli: &CliOverrides, config: Config) -> Self {
        let mut sources = ConfigSources::default();

        let default_provider = Self::layer(
            cli.default_provider.clone(),
            non_empty_env(ENV_DEFAULT_PROVIDER),
            config.general.default_provider.clone(),
            &mut sources.default_provider,
        );

        let probe_timeout_secs = Self::layer(
            cli.probe_timeout_secs,
            non_empty_env(ENV_PROBE_TIMEOUT)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0),
            Some(config.general.probe_timeout_secs)
                .filter(|secs| *secs != DEFAULT_PROBE_TIMEOUT_SECS),
            &mut sources.probe_timeout,
        )
        .unwrap_or(DEFAULT_PROBE_TIMEOUT_SECS);

        let bundled_bin_dir = Self::layer(
            cli.bundled_bin_dir.clone(),
            non_empty_env(ENV_BUNDLED_BIN_DIR).map(PathBuf::from),
            config.general.bundled_bin_dir.clone(),
            &mut sources.bundled_bin_dir,
        );

        Self {
            default_provider,
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            bundled_bin_dir,
            stream_buffer: config.general.stream_buffer.clamp(1, MAX_STREAM_BUFFER),
            providers: config.providers,
            sources,
        }
    }

    fn layer<T>(
        cli: Option<T>,
        env: Option<T>,
        file: Option<T>,
        source: &mut ConfigSource,
    ) -> Option<T> {
        if cli.is_some() {
            *source = ConfigSource::Cli;
            return cli;
        }
        if env.is_some() {
            *source = ConfigSource::Env;
            return env;
        }
        if file.is_some() {
            *source = ConfigSource::ConfigFile;
            return file;
        }
        *source = ConfigSource::Default;
        None
    }

    /// Explicit binary path for a provider: `AGENTBRIDGE_<ID>_BIN`, then the
    /// config file's `binary_path`.
    #[must_use]
    pub fn binary_override(&self, provider_id: &str) -> Option<PathBuf> {
        non_empty_env(&binary_env_var(provider_id))
            .map(PathBuf::from)
            .or_else(|| {
                self.providers
                    .get(provider_id)
                    .and_then(|p| p.binary_path.clone())
            })
    }

    /// Child environment overrides configured for a provider.
    #[must_use]
    pub fn provider_env(&self, provider_id: &str) -> EnvMap {
        self.providers
            .get(provider_id)
            .map(|p| p.env.clone())
            .unwrap_or_default()
    }
}
