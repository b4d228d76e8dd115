//! Well-known directories: our own config dir, the agents' config dirs, and
//! the places agent CLIs usually get installed.

use directories::{BaseDirs, ProjectDirs};
use std::path::{Path, PathBuf};

/// Overrides the Codex home directory (default `~/.codex`).
pub const ENV_CODEX_HOME: &str = "CODEX_HOME";
/// Overrides the Claude config directory (default `~/.claude`).
pub const ENV_CLAUDE_CONFIG_DIR: &str = "CLAUDE_CONFIG_DIR";

/// Application paths.
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory.
    pub cache: PathBuf,
}

impl AppPaths {
    /// Create paths for the agentbridge application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("dev", "agentbridge", "agentbridge") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
            }
        } else {
            let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
            Self {
                config: home.join(".config/agentbridge"),
                cache: home.join(".cache/agentbridge"),
            }
        }
    }

    /// Path to the TOML config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// The user's home directory.
#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// `$CODEX_HOME`, else `~/.codex`.
#[must_use]
pub fn codex_home() -> Option<PathBuf> {
    env_dir(ENV_CODEX_HOME).or_else(|| home_dir().map(|h| h.join(".codex")))
}

/// `$CLAUDE_CONFIG_DIR`, else `~/.claude`.
#[must_use]
pub fn claude_config_dir() -> Option<PathBuf> {
    env_dir(ENV_CLAUDE_CONFIG_DIR).or_else(|| home_dir().map(|h| h.join(".claude")))
}

/// `~/.claude.json`, Claude's global state file (holds per-project MCP servers).
#[must_use]
pub fn claude_state_file() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".claude.json"))
}

/// `<os>-<arch>` tag used for bundled binaries, e.g. `darwin-arm64`, `linux-x64`.
#[must_use]
pub fn platform_tag() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "aarch64" => "arm64",
        "x86_64" => "x64",
        other => other,
    };
    format!("{os}-{arch}")
}

/// Fixed install locations worth checking before asking a shell, in order.
#[must_use]
pub fn common_bin_dirs(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if cfg!(windows) {
        if let Some(appdata) = env_dir("APPDATA") {
            dirs.push(appdata.join("npm"));
        }
        if let Some(local) = env_dir("LOCALAPPDATA") {
            dirs.push(local.join("Programs"));
        }
        if let Some(home) = home {
            dirs.push(home.join(".bun").join("bin"));
        }
        return dirs;
    }

    if let Some(home) = home {
        for rel in [
            ".local/bin",
            ".npm-global/bin",
            ".bun/bin",
            ".volta/bin",
            ".yarn/bin",
            ".cargo/bin",
            "bin",
        ] {
            dirs.push(home.join(rel));
        }
    }
    for abs in [
        "/opt/homebrew/bin",
        "/usr/local/bin",
        "/usr/bin",
        "/bin",
        "/usr/sbin",
        "/sbin",
    ] {
        dirs.push(PathBuf::from(abs));
    }
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_tag_uses_node_style_names() {
        let tag = platform_tag();
        assert!(!tag.contains("macos"));
        assert!(!tag.contains("x86_64"));
        assert!(tag.contains('-'));
    }

    #[cfg(unix)]
    #[test]
    fn common_dirs_put_home_entries_first() {
        let dirs = common_bin_dirs(Some(Path::new("/home/u")));
        assert_eq!(dirs[0], PathBuf::from("/home/u/.local/bin"));
        assert!(dirs.contains(&PathBuf::from("/usr/local/bin")));
    }

    #[test]
    fn config_file_lives_in_config_dir() {
        let paths = AppPaths::new();
        assert!(paths.config_file().starts_with(&paths.config));
        assert!(paths.config_file().ends_with("config.toml"));
    }
}
