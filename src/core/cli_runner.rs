//! Time-bounded subprocess probes.
//!
//! Used for the short-lived helper commands the resolvers run: the
//! login-shell environment dump, `npm prefix -g`, and `command -v`. Agent
//! sessions do not go through here; see [`crate::core::process`].

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{BridgeError, Result};

/// Default upper bound for helper probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Output from a probe command.
#[derive(Debug)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CliOutput {
    /// Check if command succeeded (exit code 0).
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// First non-empty stdout line, trimmed.
    #[must_use]
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

/// Run a command with a hard timeout.
///
/// stdin is closed so a probe can never block on a prompt. The child is
/// killed if the timeout fires.
///
/// # Errors
///
/// Returns error if:
/// - The program cannot be spawned
/// - The command times out
/// - Reading its output fails
pub async fn run_command(
    program: &Path,
    args: &[&str],
    timeout_duration: Duration,
) -> Result<CliOutput> {
    let program_name = program.display().to_string();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::SpawnFailed {
            program: program_name.clone(),
            reason: e.to_string(),
        })?;

    let result = timeout(timeout_duration, async {
        // Drain both pipes concurrently so a chatty stderr cannot stall stdout.
        let stdout_handle = async {
            let mut stdout = String::new();
            if let Some(mut out) = child.stdout.take() {
                out.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(stdout)
        };

        let stderr_handle = async {
            let mut stderr = String::new();
            if let Some(mut err) = child.stderr.take() {
                err.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(stderr)
        };

        let (stdout_result, stderr_result) = tokio::join!(stdout_handle, stderr_handle);
        let stdout = stdout_result?;
        let stderr = stderr_result?;

        let status = child.wait().await?;

        Ok::<_, std::io::Error>(CliOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    })
    .await;

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(BridgeError::Io(e)),
        Err(_) => {
            tracing::warn!(program = %program_name, "probe timed out, killing");
            let _ = child.kill().await;
            let _ = child.wait().await;
            Err(BridgeError::Timeout {
                program: program_name,
                seconds: timeout_duration.as_secs(),
            })
        }
    }
}

/// Run `script` inside a non-interactive login shell (`<shell> -l -c`).
///
/// A login shell sources the user's profile, which is where version managers
/// and package managers put their `PATH` entries.
///
/// # Errors
///
/// Same as [`run_command`].
pub async fn run_login_shell(
    shell: &Path,
    script: &str,
    timeout_duration: Duration,
) -> Result<CliOutput> {
    run_command(shell, &["-l", "-c", script], timeout_duration).await
}
