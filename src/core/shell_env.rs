//! Login-shell environment capture and child environment assembly.
//!
//! A desktop app launched from a GUI shell inherits a minimal `PATH` that
//! usually lacks the directories where npm, bun or a Node version manager
//! installed the agent CLIs. The fix is to ask the user's login shell for its
//! environment once, cache it, and build every child environment on top of it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::core::cli_runner::{PROBE_TIMEOUT, run_login_shell};
use crate::storage::paths;

/// Environment variable name to value.
pub type EnvMap = BTreeMap<String, String>;

/// Marker printed before and after the `env` dump so shell banners and
/// profile noise can be sliced away.
pub const ENV_DELIMITER: &str = "__AGENTBRIDGE_ENV_DELIMITER__";

const DEFAULT_TERM: &str = "xterm-256color";

/// An API key to place in the child environment under a provider-specific name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyOverride {
    pub var: String,
    pub value: String,
}

// =============================================================================
// Cached snapshot
// =============================================================================

/// Process-lifetime cache of the login shell's environment.
///
/// Once captured the snapshot is never refreshed implicitly; [`clear`]
/// is the only invalidation path.
///
/// [`clear`]: ShellEnvironment::clear
pub struct ShellEnvironment {
    shell: PathBuf,
    timeout: Duration,
    cache: Mutex<Option<Arc<EnvMap>>>,
}

impl ShellEnvironment {
    /// Probe `shell` with the given timeout.
    #[must_use]
    pub fn new(shell: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            shell: shell.into(),
            timeout,
            cache: Mutex::new(None),
        }
    }

    /// Probe the user's default shell (`$SHELL`, falling back per OS).
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(default_shell(), PROBE_TIMEOUT)
    }

    /// A snapshot that is already populated; `capture` never spawns a shell
    /// until [`clear`](Self::clear) is called.
    #[must_use]
    pub fn fixed(env: EnvMap) -> Self {
        let this = Self::new(default_shell(), PROBE_TIMEOUT);
        if let Ok(mut cache) = this.cache.lock() {
            *cache = Some(Arc::new(env));
        }
        this
    }

    /// The process-wide instance.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ShellEnvironment>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::from_env())))
    }

    /// The shell this instance probes.
    #[must_use]
    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Returns the cached snapshot without probing.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<EnvMap>> {
        self.cache.lock().ok().and_then(|c| c.clone())
    }

    /// Drop the cached snapshot. Test/debug hook.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    /// Return the snapshot, probing the login shell on first use.
    ///
    /// Never fails: a failed, timed-out or unparsable probe yields the
    /// synthetic fallback environment, which is cached like a real one.
    pub async fn capture(&self) -> Arc<EnvMap> {
        if let Some(env) = self.cached() {
            return env;
        }

        let env = Arc::new(self.probe().await);
        if let Ok(mut cache) = self.cache.lock() {
            // A concurrent capture may have won; keep the first snapshot.
            return cache.get_or_insert_with(|| env.clone()).clone();
        }
        env
    }

    async fn probe(&self) -> EnvMap {
        if cfg!(windows) {
            return process_environment();
        }

        let script = format!("echo {ENV_DELIMITER}; env; echo {ENV_DELIMITER}; exit");
        match run_login_shell(&self.shell, &script, self.timeout).await {
            Ok(output) if output.success() => {
                if let Some(env) = parse_env_dump(&output.stdout) {
                    tracing::debug!(
                        shell = %self.shell.display(),
                        vars = env.len(),
                        "captured login shell environment"
                    );
                    return env;
                }
                tracing::warn!(shell = %self.shell.display(), "shell env dump unparsable, using fallback");
            }
            Ok(output) => {
                tracing::warn!(
                    shell = %self.shell.display(),
                    exit_code = output.exit_code,
                    "shell env probe failed, using fallback"
                );
            }
            Err(e) => {
                tracing::warn!(shell = %self.shell.display(), error = %e, "shell env probe failed, using fallback");
            }
        }
        fallback_environment(&self.shell)
    }
}

// =============================================================================
// Parsing
// =============================================================================

static ANSI_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-_]|[\x00-\x08\x0b-\x1f\x7f]")
        .unwrap()
});

/// Remove ANSI escape sequences and control characters (except `\t`/`\n`).
#[must_use]
pub fn strip_ansi(input: &str) -> String {
    ANSI_REGEX.replace_all(input, "").into_owned()
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Extract `KEY=VALUE` pairs between the first two delimiter lines.
///
/// Returns `None` when the delimiters are missing or nothing parsed.
#[must_use]
pub fn parse_env_dump(output: &str) -> Option<EnvMap> {
    let cleaned = strip_ansi(output);
    let start = cleaned.find(ENV_DELIMITER)? + ENV_DELIMITER.len();
    let end = start + cleaned[start..].find(ENV_DELIMITER)?;

    let env: EnvMap = cleaned[start..end]
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| is_env_key(key))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    (!env.is_empty()).then_some(env)
}

// =============================================================================
// Defaults
// =============================================================================

/// The user's login shell: `$SHELL`, else `/bin/zsh` on macOS, `/bin/bash` elsewhere.
#[must_use]
pub fn default_shell() -> PathBuf {
    std::env::var_os("SHELL")
        .filter(|s| !s.is_empty())
        .map_or_else(
            || {
                if cfg!(target_os = "macos") {
                    PathBuf::from("/bin/zsh")
                } else {
                    PathBuf::from("/bin/bash")
                }
            },
            PathBuf::from,
        )
}

/// Current process environment, skipping non-UTF-8 entries.
#[must_use]
pub fn process_environment() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

fn os_default(key: &str, shell: &Path) -> Option<String> {
    match key {
        "HOME" => paths::home_dir().map(|h| h.display().to_string()),
        "USER" => std::env::var("LOGNAME")
            .or_else(|_| std::env::var("USERNAME"))
            .ok(),
        "SHELL" => Some(shell.display().to_string()),
        "TERM" => Some(DEFAULT_TERM.to_string()),
        _ => None,
    }
}

/// Minimal synthetic environment used when the shell probe fails.
#[must_use]
pub fn fallback_environment(shell: &Path) -> EnvMap {
    let mut env = EnvMap::new();
    for key in ["HOME", "USER", "SHELL", "TERM"] {
        if let Some(value) = os_default(key, shell) {
            env.insert(key.to_string(), value);
        }
    }

    let home = paths::home_dir();
    let mut dirs: Vec<String> = paths::common_bin_dirs(home.as_deref())
        .into_iter()
        .map(|d| d.display().to_string())
        .collect();
    if let Ok(current) = std::env::var("PATH") {
        for entry in std::env::split_paths(&current) {
            let entry = entry.display().to_string();
            if !dirs.contains(&entry) {
                dirs.push(entry);
            }
        }
    }
    let separator = if cfg!(windows) { ";" } else { ":" };
    env.insert("PATH".to_string(), dirs.join(separator));
    env
}

// =============================================================================
// Runtime environment
// =============================================================================

/// Apply caller overrides in place. An empty value deletes the key.
///
/// Idempotent: applying the same map twice equals applying it once.
pub fn apply_overrides(env: &mut EnvMap, overrides: &EnvMap) {
    for (key, value) in overrides {
        if value.is_empty() {
            env.remove(key);
        } else {
            env.insert(key.clone(), value.clone());
        }
    }
}

/// Assemble the environment for an agent subprocess.
///
/// Merge order:
/// 1. the login-shell snapshot,
/// 2. the host process environment on top (host-injected variables win),
/// 3. `PATH` restored from the snapshot,
/// 4. `HOME`/`USER`/`SHELL`/`TERM` filled from OS defaults if still missing,
/// 5. the API key override,
/// 6. caller overrides (empty value = delete).
#[must_use]
pub fn build_runtime_environment(
    shell_env: &EnvMap,
    process_env: &EnvMap,
    api_key: Option<&ApiKeyOverride>,
    overrides: &EnvMap,
) -> EnvMap {
    let mut env = shell_env.clone();
    env.extend(process_env.iter().map(|(k, v)| (k.clone(), v.clone())));

    if let Some(path) = shell_env.get("PATH") {
        env.insert("PATH".to_string(), path.clone());
    }

    let shell = shell_env
        .get("SHELL")
        .map_or_else(default_shell, PathBuf::from);
    for key in ["HOME", "USER", "SHELL", "TERM"] {
        if !env.contains_key(key) {
            if let Some(value) = os_default(key, &shell) {
                env.insert(key.to_string(), value);
            }
        }
    }

    if let Some(key) = api_key {
        env.insert(key.var.clone(), key.value.clone());
    }

    apply_overrides(&mut env, overrides);
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parse_slices_between_delimiters() {
        let output = format!(
            "Welcome to zsh!\nPATH=/banner\n{ENV_DELIMITER}\nPATH=/usr/bin:/opt/bin\nHOME=/home/u\n{ENV_DELIMITER}\nlogout\n"
        );
        let env = parse_env_dump(&output).unwrap();
        assert_eq!(env.get("PATH").unwrap(), "/usr/bin:/opt/bin");
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn parse_splits_on_first_equals_only() {
        let output = format!("{ENV_DELIMITER}\nOPTS=a=b=c\n{ENV_DELIMITER}\n");
        let env = parse_env_dump(&output).unwrap();
        assert_eq!(env.get("OPTS").unwrap(), "a=b=c");
    }

    #[test]
    fn parse_strips_ansi_and_carriage_returns() {
        let output = format!(
            "\x1b[1;32m{ENV_DELIMITER}\x1b[0m\r\nTERM=xterm\r\n\x1b]0;title\x07FOO=bar\n{ENV_DELIMITER}"
        );
        let env = parse_env_dump(&output).unwrap();
        assert_eq!(env.get("TERM").unwrap(), "xterm");
        assert_eq!(env.get("FOO").unwrap(), "bar");
    }

    #[test]
    fn parse_skips_continuation_lines() {
        let output = format!("{ENV_DELIMITER}\nMULTI=line one\nline two\n not a key=x\nOK=1\n{ENV_DELIMITER}");
        let env = parse_env_dump(&output).unwrap();
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("OK").unwrap(), "1");
    }

    #[test]
    fn parse_requires_both_delimiters() {
        assert!(parse_env_dump(&format!("{ENV_DELIMITER}\nA=1\n")).is_none());
        assert!(parse_env_dump("A=1").is_none());
    }

    #[test]
    fn host_vars_win_but_path_comes_from_shell() {
        let shell = map(&[("PATH", "/shell/bin"), ("EDITOR", "vim"), ("HOME", "/h")]);
        let process = map(&[("PATH", "/usr/bin"), ("EDITOR", "code"), ("APP_TOKEN", "t")]);
        let env = build_runtime_environment(&shell, &process, None, &EnvMap::new());
        assert_eq!(env.get("PATH").unwrap(), "/shell/bin");
        assert_eq!(env.get("EDITOR").unwrap(), "code");
        assert_eq!(env.get("APP_TOKEN").unwrap(), "t");
        assert_eq!(env.get("TERM").unwrap(), DEFAULT_TERM);
    }

    #[test]
    fn api_key_then_overrides_with_empty_meaning_delete() {
        let shell = map(&[("PATH", "/bin"), ("HOME", "/h"), ("STALE", "1")]);
        let key = ApiKeyOverride {
            var: "OPENAI_API_KEY".into(),
            value: "sk-test".into(),
        };
        let overrides = map(&[("STALE", ""), ("EXTRA", "yes")]);
        let env = build_runtime_environment(&shell, &EnvMap::new(), Some(&key), &overrides);
        assert_eq!(env.get("OPENAI_API_KEY").unwrap(), "sk-test");
        assert!(!env.contains_key("STALE"));
        assert_eq!(env.get("EXTRA").unwrap(), "yes");
    }

    #[test]
    fn overrides_are_idempotent() {
        let base = map(&[("A", "1"), ("B", "2"), ("C", "3")]);
        let overrides = map(&[("A", ""), ("B", "20"), ("D", "4")]);

        let mut once = base.clone();
        apply_overrides(&mut once, &overrides);
        let mut twice = once.clone();
        apply_overrides(&mut twice, &overrides);

        assert_eq!(once, twice);
        assert_eq!(once, map(&[("B", "20"), ("C", "3"), ("D", "4")]));
    }

    #[test]
    fn fallback_has_minimal_keys() {
        let env = fallback_environment(Path::new("/bin/sh"));
        assert_eq!(env.get("SHELL").unwrap(), "/bin/sh");
        assert_eq!(env.get("TERM").unwrap(), DEFAULT_TERM);
        assert!(env.get("PATH").is_some_and(|p| !p.is_empty()));
    }

    #[tokio::test]
    async fn fixed_snapshot_never_probes() {
        let shell = ShellEnvironment::fixed(map(&[("PATH", "/fixed")]));
        let env = shell.capture().await;
        assert_eq!(env.get("PATH").unwrap(), "/fixed");
        assert!(shell.cached().is_some());
        shell.clear();
        assert!(shell.cached().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn real_shell_probe_captures_path() {
        let shell = ShellEnvironment::new("/bin/sh", Duration::from_secs(10));
        let env = shell.capture().await;
        assert!(env.contains_key("PATH"));
        // Second call is served from the cache.
        assert!(Arc::ptr_eq(&env, &shell.capture().await));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_shell_falls_back() {
        let shell = ShellEnvironment::new("/no/such/shell", Duration::from_secs(1));
        let env = shell.capture().await;
        assert_eq!(env.get("TERM").unwrap(), DEFAULT_TERM);
    }
}
