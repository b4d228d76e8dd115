//! Test utilities for agentbridge.
//!
//! Provides fake agent binaries, an isolated provider context, a stream
//! order checker and assertion macros for use across all test modules.
//!
//! # Usage
//!
//! ```rust,ignore
//! use agentbridge::test_utils::*;
//!
//! let dir = TestDir::new();
//! let bin = dir.create_dir("bin");
//! FakeAgent::new("codex").stdout_lines(CODEX_SESSION_JSONL).install(&bin);
//! let ctx = isolated_context(&bin, &[("OPENAI_API_KEY", "sk-test")]);
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::core::binary::BinaryResolver;
use crate::core::chunk::Chunk;
use crate::core::credentials::{CredentialResolver, MemoryStore};
use crate::core::provider::ProviderContext;
use crate::core::shell_env::{EnvMap, ShellEnvironment};

// =============================================================================
// Fixtures
// =============================================================================

/// A complete `codex exec --json` turn: reasoning, a command, an answer.
pub const CODEX_SESSION_JSONL: &str = r#"{"type":"thread.started","thread_id":"thread-abc"}
{"type":"turn.started"}
{"type":"item.completed","item":{"id":"item_0","type":"reasoning","text":"Looking at the files"}}
{"type":"item.started","item":{"id":"item_1","type":"command_execution","command":"ls","aggregated_output":"","status":"in_progress"}}
{"type":"item.completed","item":{"id":"item_1","type":"command_execution","command":"ls","aggregated_output":"Cargo.toml\nsrc\n","exit_code":0,"status":"completed"}}
{"type":"item.completed","item":{"id":"item_2","type":"agent_message","text":"The project has a Cargo.toml and src."}}
{"type":"turn.completed","usage":{"input_tokens":120,"cached_input_tokens":20,"output_tokens":30}}
"#;

/// A complete `claude -p --output-format stream-json` turn with one tool call.
pub const CLAUDE_SESSION_JSONL: &str = r#"{"type":"system","subtype":"init","session_id":"claude-s1","model":"claude-test","tools":["Bash","Read"]}
{"type":"assistant","message":{"id":"msg_1","content":[{"type":"text","text":"Let me look."}]},"session_id":"claude-s1"}
{"type":"assistant","message":{"id":"msg_2","content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]},"session_id":"claude-s1"}
{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"Cargo.toml\nsrc","is_error":false}]}}
{"type":"assistant","message":{"id":"msg_3","content":[{"type":"text","text":"Two entries."}]},"session_id":"claude-s1"}
{"type":"result","subtype":"success","is_error":false,"result":"Two entries.","session_id":"claude-s1","usage":{"input_tokens":50,"output_tokens":12}}
"#;

// =============================================================================
// Temp Directory Utilities
// =============================================================================

/// A temporary directory for tests with automatic cleanup.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

impl TestDir {
    /// Create a new isolated temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with the given content, creating parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&path, content).expect("Failed to write test file");
        path
    }

    /// Create a subdirectory and return its path.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    pub fn create_dir(&self, name: &str) -> PathBuf {
        let path = self.inner.path().join(name);
        fs::create_dir_all(&path).expect("Failed to create test directory");
        path
    }

    /// Read a file from the temporary directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

// =============================================================================
// Fake agent binaries
// =============================================================================

#[derive(Debug, Clone)]
enum Step {
    Stdout(String),
    Stderr(String),
    Sleep(Duration),
}

/// Child variable that replaces every sleep duration of a [`FakeAgent`].
pub const SLEEP_OVERRIDE_VAR: &str = "FAKE_AGENT_SLEEP";

/// A `/bin/sh` script standing in for an agent CLI.
///
/// Steps run in order; stdout payloads are written verbatim from fixture
/// files so no shell quoting is involved. Setting [`SLEEP_OVERRIDE_VAR`]
/// in the child environment shortens or lengthens every sleep.
#[derive(Debug, Clone)]
pub struct FakeAgent {
    name: String,
    steps: Vec<Step>,
    exit_code: i32,
    record_args: bool,
    record_env: bool,
}

impl FakeAgent {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            exit_code: 0,
            record_args: false,
            record_env: false,
        }
    }

    /// Write `text` to stdout exactly as given.
    #[must_use]
    pub fn stdout_raw(mut self, text: impl Into<String>) -> Self {
        self.steps.push(Step::Stdout(text.into()));
        self
    }

    /// Write newline-terminated JSONL to stdout in one go.
    #[must_use]
    pub fn stdout_lines(self, jsonl: &str) -> Self {
        let mut text = jsonl.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        self.stdout_raw(text)
    }

    #[must_use]
    pub fn stderr_line(mut self, line: impl Into<String>) -> Self {
        self.steps.push(Step::Stderr(line.into()));
        self
    }

    #[must_use]
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    #[must_use]
    pub const fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Save the argument list, one per line, to `<name>.args`.
    #[must_use]
    pub const fn record_args(mut self) -> Self {
        self.record_args = true;
        self
    }

    /// Save the child environment to `<name>.env`.
    #[must_use]
    pub const fn record_env(mut self) -> Self {
        self.record_env = true;
        self
    }

    /// Write the script to `dir/<name>` and its fixtures to `dir/<name>.d/`.
    ///
    /// # Panics
    ///
    /// Panics if any file cannot be written.
    pub fn install(&self, dir: &Path) -> PathBuf {
        let data_dir = dir.join(format!("{}.d", self.name));
        fs::create_dir_all(&data_dir).expect("Failed to create fixture directory");

        let mut script = String::from("#!/bin/sh\n");
        if self.record_args {
            let out = dir.join(format!("{}.args", self.name));
            let _ = writeln!(script, "printf '%s\\n' \"$@\" > '{}'", out.display());
        }
        if self.record_env {
            let out = dir.join(format!("{}.env", self.name));
            let _ = writeln!(script, "env > '{}'", out.display());
        }
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::Stdout(text) => {
                    let fixture = data_dir.join(format!("out-{index}"));
                    fs::write(&fixture, text).expect("Failed to write stdout fixture");
                    let _ = writeln!(script, "cat '{}'", fixture.display());
                }
                Step::Stderr(line) => {
                    let fixture = data_dir.join(format!("err-{index}"));
                    fs::write(&fixture, format!("{line}\n"))
                        .expect("Failed to write stderr fixture");
                    let _ = writeln!(script, "cat '{}' >&2", fixture.display());
                }
                Step::Sleep(duration) => {
                    let _ = writeln!(
                        script,
                        "sleep \"${{{SLEEP_OVERRIDE_VAR}:-{:.3}}}\"",
                        duration.as_secs_f64()
                    );
                }
            }
        }
        let _ = writeln!(script, "exit {}", self.exit_code);

        let path = dir.join(&self.name);
        fs::write(&path, script).expect("Failed to write fake agent");
        make_executable(&path);
        path
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to mark fake agent executable");
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) {}

// =============================================================================
// Isolated provider context
// =============================================================================

/// A context that only sees `bin_dir`, the given credential variables and
/// a fixed shell snapshot. No login shell, keychain or home directory is
/// consulted.
#[must_use]
pub fn isolated_context(bin_dir: &Path, credential_env: &[(&str, &str)]) -> ProviderContext {
    let binaries = BinaryResolver::new()
        .with_home(None)
        .with_search_dirs(vec![bin_dir.to_path_buf()])
        .with_shell_probes(false);
    let env: HashMap<String, String> = credential_env
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    let credentials = CredentialResolver::new(Arc::new(MemoryStore::new())).with_env(env);
    let mut shell = EnvMap::new();
    shell.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    shell.insert("SHELL".to_string(), "/bin/sh".to_string());
    ProviderContext::new(
        Arc::new(binaries),
        Arc::new(credentials),
        Arc::new(ShellEnvironment::fixed(shell)),
    )
}

// =============================================================================
// Stream checks
// =============================================================================

/// Check the ordering rules every canonical stream obeys.
///
/// # Errors
///
/// Returns a description of the first violation.
pub fn check_stream_order(chunks: &[Chunk]) -> Result<(), String> {
    let mut open_text: Option<&str> = None;
    let mut closed_text: HashSet<&str> = HashSet::new();
    let mut tool_started: HashSet<&str> = HashSet::new();
    let mut tool_input: HashSet<&str> = HashSet::new();
    let mut tool_output: HashSet<&str> = HashSet::new();
    let mut finished = false;

    for (index, chunk) in chunks.iter().enumerate() {
        let at = |msg: &str| format!("chunk {index} ({}): {msg}", chunk.type_name());
        if finished {
            return Err(at("chunk after finish"));
        }
        if open_text.is_some()
            && !matches!(
                chunk,
                Chunk::TextDelta { .. } | Chunk::TextEnd { .. } | Chunk::Finish
            )
        {
            return Err(at("text block still open"));
        }
        match chunk {
            Chunk::Start { .. } if index != 0 => return Err(at("start is not first")),
            Chunk::TextStart { id } => {
                if closed_text.contains(id.as_str()) {
                    return Err(at("text block id reused"));
                }
                open_text = Some(id.as_str());
            }
            Chunk::TextDelta { id, .. } if open_text != Some(id.as_str()) => {
                return Err(at("delta outside its block"));
            }
            Chunk::TextEnd { id } => {
                if open_text != Some(id.as_str()) {
                    return Err(at("end of a block that is not open"));
                }
                open_text = None;
                closed_text.insert(id.as_str());
            }
            Chunk::ToolInputStart { tool_call_id, .. } => {
                tool_started.insert(tool_call_id.as_str());
            }
            Chunk::ToolInputDelta { tool_call_id, .. }
                if !tool_started.contains(tool_call_id.as_str()) =>
            {
                return Err(at("tool delta before start"));
            }
            Chunk::ToolInputAvailable { tool_call_id, .. } => {
                if !tool_started.contains(tool_call_id.as_str()) {
                    return Err(at("tool input before start"));
                }
                if !tool_input.insert(tool_call_id.as_str()) {
                    return Err(at("tool input repeated"));
                }
            }
            Chunk::ToolOutputAvailable { tool_call_id, .. } => {
                if !tool_input.contains(tool_call_id.as_str()) {
                    return Err(at("tool output before input"));
                }
                if !tool_output.insert(tool_call_id.as_str()) {
                    return Err(at("tool output repeated"));
                }
            }
            Chunk::Finish => finished = true,
            _ => {}
        }
    }
    Ok(())
}

/// Wire type names of `chunks`.
#[must_use]
pub fn chunk_types(chunks: &[Chunk]) -> Vec<&'static str> {
    chunks.iter().map(Chunk::type_name).collect()
}

/// Poll `condition` every 10ms until it holds or `limit` passes.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            "Expected string to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Assert that a chunk sequence obeys the stream ordering rules.
#[macro_export]
macro_rules! assert_stream_ordered {
    ($chunks:expr) => {
        if let Err(violation) = $crate::test_utils::check_stream_order($chunks) {
            panic!(
                "stream order violated: {}\n\nchunks: {:?}",
                violation,
                $crate::test_utils::chunk_types($chunks)
            );
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checker_accepts_a_normal_turn() {
        let chunks = vec![
            Chunk::Start { message_id: None },
            Chunk::StartStep,
            Chunk::TextStart { id: "a".into() },
            Chunk::TextDelta {
                id: "a".into(),
                delta: "hi".into(),
            },
            Chunk::TextEnd { id: "a".into() },
            Chunk::FinishStep,
            Chunk::Finish,
        ];
        assert_stream_ordered!(&chunks);
    }

    #[test]
    fn checker_flags_violations() {
        let after_finish = vec![Chunk::Finish, Chunk::StartStep];
        assert!(check_stream_order(&after_finish).is_err());

        let orphan_output = vec![Chunk::ToolOutputAvailable {
            tool_call_id: "t".into(),
            output: serde_json::Value::Null,
        }];
        assert!(check_stream_order(&orphan_output).is_err());

        let tool_inside_text = vec![
            Chunk::TextStart { id: "a".into() },
            Chunk::ToolInputStart {
                tool_call_id: "t".into(),
                tool_name: "Bash".into(),
            },
        ];
        assert!(check_stream_order(&tool_inside_text).is_err());
    }

    #[test]
    fn cancelled_stream_may_finish_with_open_text() {
        let chunks = vec![Chunk::TextStart { id: "a".into() }, Chunk::Finish];
        assert_stream_ordered!(&chunks);
    }

    #[cfg(unix)]
    #[test]
    fn fake_agent_script_is_executable() {
        let dir = TestDir::new();
        let path = FakeAgent::new("codex")
            .stdout_lines(CODEX_SESSION_JSONL)
            .stderr_line("warming up")
            .exit_code(3)
            .install(dir.path());
        assert!(crate::core::binary::is_executable(&path));
        let script = fs::read_to_string(&path).unwrap();
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.ends_with("exit 3\n"));

        let sleeper = FakeAgent::new("claude")
            .sleep(Duration::from_millis(1500))
            .install(dir.path());
        let script = fs::read_to_string(&sleeper).unwrap();
        assert_contains!(&script, "sleep \"${FAKE_AGENT_SLEEP:-1.500}\"");
    }
}
