//! Configuration and well-known paths.

pub mod config;
pub mod paths;

pub use config::{
    CliOverrides, Config, ConfigSource, ConfigSources, ENV_BUNDLED_BIN_DIR, ENV_CONFIG,
    ENV_DEFAULT_PROVIDER, ENV_PROBE_TIMEOUT, ProviderSettings, ResolvedConfig, binary_env_var,
};
pub use paths::AppPaths;
