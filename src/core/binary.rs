//! Agent binary discovery.
//!
//! Search order, first hit wins:
//! 0. an explicitly configured path
//! 1. a bundled binary under `<bundled dir>/<os>-<arch>/`
//! 2. common install locations plus every Node version manager bin directory
//! 3. the global npm prefix, asked through a login shell
//! 4. `command -v` inside a login shell, then a plain `PATH` lookup
//!
//! Every filesystem candidate must exist and be executable. Results,
//! including "not found", are cached per binary name.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde::Serialize;

use crate::core::cli_runner::{PROBE_TIMEOUT, run_command, run_login_shell};
use crate::core::shell_env::default_shell;
use crate::storage::paths;

/// Where a resolved binary was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinarySource {
    /// Explicit path from config or `AGENTBRIDGE_<ID>_BIN`.
    Configured,
    /// Shipped next to the application.
    Bundled,
    /// Found through a login shell's `PATH`.
    SystemPath,
    /// Found in a well-known install directory.
    SystemInstall,
    /// Found under the global npm prefix.
    NpmGlobal,
}

impl BinarySource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Bundled => "bundled",
            Self::SystemPath => "system-path",
            Self::SystemInstall => "system-install",
            Self::NpmGlobal => "npm-global",
        }
    }
}

impl std::fmt::Display for BinarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A located agent executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryResolution {
    pub path: PathBuf,
    pub source: BinarySource,
}

// =============================================================================
// Resolver
// =============================================================================

/// Finds agent executables and remembers the answer.
pub struct BinaryResolver {
    configured: HashMap<String, PathBuf>,
    bundled_dir: Option<PathBuf>,
    home: Option<PathBuf>,
    search_dirs: Option<Vec<PathBuf>>,
    shell: PathBuf,
    shell_probes: bool,
    timeout: Duration,
    cache: Mutex<HashMap<String, Option<BinaryResolution>>>,
}

impl Default for BinaryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryResolver {
    /// A resolver using the user's home directory and default shell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            configured: HashMap::new(),
            bundled_dir: None,
            home: paths::home_dir(),
            search_dirs: None,
            shell: default_shell(),
            shell_probes: true,
            timeout: PROBE_TIMEOUT,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide instance.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<BinaryResolver>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Use `path` for `name` ahead of every other step.
    #[must_use]
    pub fn with_configured(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.configured.insert(name.into(), path.into());
        self
    }

    /// Directory holding `<os>-<arch>/<binary>` bundled agents.
    #[must_use]
    pub fn with_bundled_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.bundled_dir = dir;
        self
    }

    /// Home directory used for install and version-manager locations.
    #[must_use]
    pub fn with_home(mut self, home: Option<PathBuf>) -> Self {
        self.home = home;
        self
    }

    /// Replace the common-location and version-manager scan with a fixed list.
    #[must_use]
    pub fn with_search_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_dirs = Some(dirs);
        self
    }

    /// Enable or disable the npm and login-shell steps.
    #[must_use]
    pub const fn with_shell_probes(mut self, enabled: bool) -> Self {
        self.shell_probes = enabled;
        self
    }

    /// Upper bound for each subprocess probe.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cached answer for `name`, if any lookup has completed.
    ///
    /// The outer `Option` is "has a lookup completed", the inner one the answer.
    #[must_use]
    #[allow(clippy::option_option)]
    pub fn cached(&self, name: &str) -> Option<Option<BinaryResolution>> {
        self.cache.lock().ok().and_then(|c| c.get(name).cloned())
    }

    /// Forget every cached answer. Test/debug hook.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Locate `name`. Never fails; `None` means every step came up empty.
    pub async fn resolve(&self, name: &str) -> Option<BinaryResolution> {
        if let Some(hit) = self.cached(name) {
            tracing::trace!(binary = name, found = hit.is_some(), "binary cache hit");
            return hit;
        }

        let result = self.search(name).await;
        match &result {
            Some(found) => tracing::info!(
                binary = name,
                path = %found.path.display(),
                source = %found.source,
                "resolved agent binary"
            ),
            None => tracing::warn!(binary = name, "agent binary not found"),
        }

        if let Ok(mut cache) = self.cache.lock() {
            return cache.entry(name.to_string()).or_insert(result).clone();
        }
        result
    }

    async fn search(&self, name: &str) -> Option<BinaryResolution> {
        if let Some(path) = self.configured.get(name) {
            if is_executable(path) {
                return Some(found(path.clone(), BinarySource::Configured));
            }
            tracing::warn!(
                binary = name,
                path = %path.display(),
                "configured binary is missing or not executable, searching"
            );
        }

        if let Some(dir) = &self.bundled_dir {
            let dir = dir.join(paths::platform_tag());
            if let Some(path) = first_executable_in(&[dir], name) {
                return Some(found(path, BinarySource::Bundled));
            }
        }

        let dirs = self.search_dirs.clone().unwrap_or_else(|| {
            let mut dirs = paths::common_bin_dirs(self.home.as_deref());
            if let Some(home) = &self.home {
                dirs.extend(version_manager_bin_dirs(home));
            }
            dirs
        });
        tracing::debug!(binary = name, dirs = dirs.len(), "scanning install locations");
        if let Some(path) = first_executable_in(&dirs, name) {
            return Some(found(path, BinarySource::SystemInstall));
        }

        if !self.shell_probes {
            return None;
        }

        if let Some(prefix) = self.npm_prefix().await {
            let dirs = if cfg!(windows) {
                vec![prefix]
            } else {
                vec![prefix.join("bin")]
            };
            if let Some(path) = first_executable_in(&dirs, name) {
                return Some(found(path, BinarySource::NpmGlobal));
            }
        }

        self.path_lookup(name)
            .await
            .map(|path| found(path, BinarySource::SystemPath))
    }

    async fn npm_prefix(&self) -> Option<PathBuf> {
        let output = if cfg!(windows) {
            run_command(Path::new("npm.cmd"), &["prefix", "-g"], self.timeout).await
        } else {
            run_login_shell(&self.shell, "npm prefix -g", self.timeout).await
        };
        match output {
            Ok(out) if out.success() => out.first_line().map(PathBuf::from),
            Ok(out) => {
                tracing::debug!(exit_code = out.exit_code, "npm prefix probe failed");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "npm prefix probe failed");
                None
            }
        }
    }

    async fn path_lookup(&self, name: &str) -> Option<PathBuf> {
        if is_plain_name(name) && !cfg!(windows) {
            let script = format!("command -v {name}");
            match run_login_shell(&self.shell, &script, self.timeout).await {
                Ok(out) if out.success() => {
                    if let Some(path) = out.first_line().map(PathBuf::from) {
                        if path.is_absolute() && is_executable(&path) {
                            return Some(path);
                        }
                    }
                }
                Ok(_) => tracing::debug!(binary = name, "login shell lookup found nothing"),
                Err(e) => tracing::debug!(binary = name, error = %e, "login shell lookup failed"),
            }
        }

        which::which(name).ok().filter(|p| is_executable(p))
    }
}

const fn found(path: PathBuf, source: BinarySource) -> BinaryResolution {
    BinaryResolution { path, source }
}

/// Names we are willing to splice into a shell command line.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// File names `name` may have on this platform.
fn executable_names(name: &str) -> Vec<String> {
    if cfg!(windows) {
        vec![
            format!("{name}.exe"),
            format!("{name}.cmd"),
            name.to_string(),
        ]
    } else {
        vec![name.to_string()]
    }
}

fn first_executable_in(dirs: &[PathBuf], name: &str) -> Option<PathBuf> {
    let names = executable_names(name);
    dirs.iter()
        .flat_map(|dir| names.iter().map(move |n| dir.join(n)))
        .find(|candidate| {
            let ok = is_executable(candidate);
            if !ok && candidate.exists() {
                tracing::debug!(path = %candidate.display(), "skipping non-executable candidate");
            }
            ok
        })
}

/// True if `path` is a regular file the current user may execute.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// =============================================================================
// Node version managers
// =============================================================================

/// `(root relative to home, suffix inside each version dir)`.
const VERSION_MANAGER_LAYOUTS: &[(&str, &str)] = &[
    (".nvm/versions/node", "bin"),
    (".local/share/fnm/node-versions", "installation/bin"),
    ("Library/Application Support/fnm/node-versions", "installation/bin"),
    (".fnm/node-versions", "installation/bin"),
    (".asdf/installs/nodejs", "bin"),
    (".nodenv/versions", "bin"),
    (".local/share/mise/installs/node", "bin"),
];

/// Bin directories of every installed Node version, per manager newest first.
#[must_use]
pub fn version_manager_bin_dirs(home: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for (root, suffix) in VERSION_MANAGER_LAYOUTS {
        let root = home.join(root);
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        let mut versions: Vec<(String, PathBuf)> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.path().is_dir())
            .map(|e| (e.file_name().to_string_lossy().into_owned(), e.path()))
            .collect();
        versions.sort_by(|a, b| compare_versions(&b.0, &a.0));
        dirs.extend(versions.into_iter().map(|(_, p)| p.join(suffix)));
    }
    dirs
}

fn version_key(name: &str) -> Option<Vec<u64>> {
    name.trim_start_matches('v')
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Numeric comparison of `v20.11.0`-style names; non-numeric names sort lowest.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (version_key(a), version_key(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn write_exe(dir: &Path, name: &str, mode: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    fn isolated(dirs: Vec<PathBuf>) -> BinaryResolver {
        BinaryResolver::new()
            .with_home(None)
            .with_search_dirs(dirs)
            .with_shell_probes(false)
    }

    #[test]
    fn versions_sort_numerically() {
        let mut v = vec!["v9.0.0", "v20.11.0", "v18.2.1", "system", "v20.2.0"];
        v.sort_by(|a, b| compare_versions(b, a));
        assert_eq!(v, vec!["v20.11.0", "v20.2.0", "v18.2.1", "v9.0.0", "system"]);
    }

    #[test]
    fn plain_names_only() {
        assert!(is_plain_name("codex"));
        assert!(is_plain_name("claude-code_1.0"));
        assert!(!is_plain_name("codex; rm -rf /"));
        assert!(!is_plain_name(""));
    }

    #[test]
    fn source_tags_are_kebab_case() {
        assert_eq!(
            serde_json::to_string(&BinarySource::NpmGlobal).unwrap(),
            "\"npm-global\""
        );
        assert_eq!(BinarySource::SystemPath.to_string(), "system-path");
    }

    #[cfg(unix)]
    #[test]
    fn version_manager_dirs_newest_first() {
        let home = TempDir::new().unwrap();
        for v in ["v18.0.0", "v22.1.0", "v20.5.0"] {
            std::fs::create_dir_all(home.path().join(".nvm/versions/node").join(v).join("bin"))
                .unwrap();
        }
        let dirs = version_manager_bin_dirs(home.path());
        let names: Vec<_> = dirs
            .iter()
            .map(|d| d.parent().unwrap().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["v22.1.0", "v20.5.0", "v18.0.0"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn skips_non_executable_and_continues() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        write_exe(&first, "fake-agent", 0o644);
        let good = write_exe(&second, "fake-agent", 0o755);

        let resolver = isolated(vec![first, second]);
        let hit = resolver.resolve("fake-agent").await.unwrap();
        assert_eq!(hit.path, good);
        assert_eq!(hit.source, BinarySource::SystemInstall);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn configured_path_wins_over_bundled() {
        let tmp = TempDir::new().unwrap();
        let configured = write_exe(&tmp.path().join("custom"), "fake-agent", 0o755);
        write_exe(
            &tmp.path().join("bundle").join(paths::platform_tag()),
            "fake-agent",
            0o755,
        );

        let resolver = isolated(vec![])
            .with_bundled_dir(Some(tmp.path().join("bundle")))
            .with_configured("fake-agent", &configured);
        let hit = resolver.resolve("fake-agent").await.unwrap();
        assert_eq!(hit.source, BinarySource::Configured);
        assert_eq!(hit.path, configured);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn bundled_binary_is_platform_qualified() {
        let tmp = TempDir::new().unwrap();
        let bundled = write_exe(
            &tmp.path().join(paths::platform_tag()),
            "fake-agent",
            0o755,
        );
        // A bare binary in the bundle root is not picked up.
        write_exe(tmp.path(), "other-agent", 0o755);

        let resolver = isolated(vec![]).with_bundled_dir(Some(tmp.path().to_path_buf()));
        assert_eq!(resolver.resolve("fake-agent").await.unwrap().path, bundled);
        assert!(resolver.resolve("other-agent").await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn not_found_is_cached_until_cleared() {
        let tmp = TempDir::new().unwrap();
        let resolver = isolated(vec![tmp.path().to_path_buf()]);

        assert!(resolver.resolve("late-agent").await.is_none());
        assert_eq!(resolver.cached("late-agent"), Some(None));

        write_exe(tmp.path(), "late-agent", 0o755);
        assert!(resolver.resolve("late-agent").await.is_none());

        resolver.clear();
        assert!(resolver.resolve("late-agent").await.is_some());
    }
}
