//! Subprocess-backed sessions.
//!
//! [`ProcessSessionManager`] owns the lifecycle shared by every CLI agent:
//! resolve, spawn, frame stdout into JSON events, run them through the
//! provider's [`Transformer`], and forward chunks over a bounded channel.
//! Each session runs as one spawned driver task; the caller only holds the
//! receiving end.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Instrument;

use crate::core::binary::BinaryResolution;
use crate::core::chunk::Chunk;
use crate::core::credentials::{Credential, CredentialSpec};
use crate::core::line_buffer::LineBuffer;
use crate::core::provider::{AuthMethod, AuthStatus, ChatOptions, ChatStream, ProviderContext, StderrHook};
use crate::core::session::{
    AbortHandle, AbortSignal, SessionGuard, SessionRegistry, abort_pair, send_terminate,
};
use crate::core::shell_env::{ApiKeyOverride, build_runtime_environment, process_environment};
use crate::core::transform::Transformer;
use crate::error::BridgeError;

/// Bytes requested per stdout read.
const READ_CHUNK: usize = 8 * 1024;
/// Grace period between SIGTERM and a hard kill.
const KILL_GRACE: Duration = Duration::from_secs(3);
/// How long a cancelled session waits to hand over its last `finish`.
const FINAL_SEND_TIMEOUT: Duration = Duration::from_secs(2);
/// How long to wait for the stderr reader after exit.
const STDERR_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

const STDERR_TAIL_LINES: usize = 40;
const STDERR_TAIL_BYTES: usize = 4 * 1024;

// =============================================================================
// Agent description
// =============================================================================

/// How one agent CLI is located, authenticated and invoked.
pub trait AgentCli: Send + Sync + 'static {
    type Transformer: Transformer;

    /// Provider id, e.g. `codex`.
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Executable name searched for by the binary resolver.
    fn binary_name(&self) -> &'static str;

    /// Where this agent's credential lives.
    fn credential_spec(&self) -> CredentialSpec;

    /// Whether a missing credential ends the session before spawning.
    fn requires_credential(&self) -> bool {
        true
    }

    /// Full argument list; the prompt is the last element.
    fn build_args(&self, options: &ChatOptions) -> Vec<String>;

    /// Child environment entry carrying `credential`, if it should be passed.
    fn credential_env(&self, credential: &Credential) -> Option<ApiKeyOverride>;

    /// A fresh transformer for one session.
    fn new_transformer(&self) -> Self::Transformer;
}

// =============================================================================
// Session manager
// =============================================================================

/// Runs sessions of one agent CLI.
pub struct ProcessSessionManager<A: AgentCli> {
    agent: Arc<A>,
    ctx: ProviderContext,
}

impl<A: AgentCli> ProcessSessionManager<A> {
    #[must_use]
    pub fn new(agent: A, ctx: ProviderContext) -> Self {
        Self {
            agent: Arc::new(agent),
            ctx,
        }
    }

    #[must_use]
    pub fn agent(&self) -> &A {
        &self.agent
    }

    #[must_use]
    pub const fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    /// The registry shared with every provider on the same context.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.ctx.sessions
    }

    pub async fn binary(&self) -> Option<BinaryResolution> {
        self.ctx.binaries.resolve(self.agent.binary_name()).await
    }

    pub async fn is_available(&self) -> bool {
        self.binary().await.is_some()
    }

    #[must_use]
    pub fn auth_status(&self) -> AuthStatus {
        match self.ctx.credentials.resolve(&self.agent.credential_spec()) {
            Some(credential) => AuthStatus {
                authenticated: true,
                method: Some(if credential.is_api_key {
                    AuthMethod::ApiKey
                } else {
                    AuthMethod::Token
                }),
                source: Some(credential.source.to_string()),
                error: None,
            },
            None => AuthStatus::missing(
                BridgeError::AuthNotConfigured {
                    provider: self.agent.id().to_string(),
                }
                .to_string(),
            ),
        }
    }

    /// Start a session. The session is registered before this returns, so
    /// a `cancel` issued right after always finds it.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn chat(&self, options: ChatOptions) -> ChatStream {
        let (handle, signal) = abort_pair();
        let sessions = Arc::clone(&self.ctx.sessions);
        let generation = sessions.register(&options.sub_chat_id, self.agent.id(), handle.clone());
        let guard = SessionGuard::new(Arc::clone(&sessions), &options.sub_chat_id, generation);
        let (tx, rx) = mpsc::channel(self.ctx.stream_buffer.max(1));

        let span = tracing::info_span!(
            "session",
            provider = self.agent.id(),
            sub_chat_id = %options.sub_chat_id,
            generation
        );
        let driver = Driver {
            agent: Arc::clone(&self.agent),
            ctx: self.ctx.clone(),
            sessions,
            caller_abort: options.abort.clone(),
            options,
            generation,
            handle: handle.clone(),
            abort: signal,
            tx,
            finish_sent: false,
        };
        tokio::spawn(
            async move {
                driver.run().await;
                drop(guard);
            }
            .instrument(span),
        );

        ChatStream::new(rx, Some(handle))
    }

    pub fn cancel(&self, sub_chat_id: &str) {
        self.ctx.sessions.cancel(sub_chat_id);
    }

    #[must_use]
    pub fn is_active(&self, sub_chat_id: &str) -> bool {
        self.ctx.sessions.is_active(sub_chat_id)
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Why the read loop stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Cancelled,
    Disconnected,
}

struct Driver<A: AgentCli> {
    agent: Arc<A>,
    ctx: ProviderContext,
    sessions: Arc<SessionRegistry>,
    options: ChatOptions,
    generation: u64,
    handle: AbortHandle,
    abort: AbortSignal,
    caller_abort: Option<AbortSignal>,
    tx: mpsc::Sender<Chunk>,
    finish_sent: bool,
}

/// Resolves once either signal fires.
async fn either_aborted(own: &mut AbortSignal, caller: &mut Option<AbortSignal>) {
    match caller {
        Some(caller) => {
            tokio::select! {
                () = own.aborted() => {}
                () = caller.aborted() => {}
            }
        }
        None => own.aborted().await,
    }
}

impl<A: AgentCli> Driver<A> {
    fn is_aborted(&self) -> bool {
        self.abort.is_aborted() || self.caller_abort.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    async fn run(mut self) {
        let provider = self.agent.id();

        let Some(binary) = self.ctx.binaries.resolve(self.agent.binary_name()).await else {
            let err = BridgeError::BinaryNotFound {
                provider: provider.to_string(),
            };
            tracing::warn!(error = %err, "cannot start session");
            self.send_final(vec![Chunk::error(describe(&err)), Chunk::Finish], None)
                .await;
            return;
        };

        let credential = self.ctx.credentials.resolve(&self.agent.credential_spec());
        if credential.is_none() && self.agent.requires_credential() {
            let err = BridgeError::AuthNotConfigured {
                provider: provider.to_string(),
            };
            tracing::warn!(error = %err, "cannot start session");
            self.send_final(vec![Chunk::auth_error(describe(&err)), Chunk::Finish], None)
                .await;
            return;
        }

        if self.is_aborted() {
            self.handle.abort();
            self.send_final(vec![Chunk::Finish], Some(FINAL_SEND_TIMEOUT))
                .await;
            return;
        }

        let shell_env = self.ctx.shell_env.capture().await;
        let api_key = credential.as_ref().and_then(|c| self.agent.credential_env(c));
        let mut overrides = self.ctx.env_for(provider);
        overrides.extend(self.options.env.clone());
        let env = build_runtime_environment(
            &shell_env,
            &process_environment(),
            api_key.as_ref(),
            &overrides,
        );
        let args = self.agent.build_args(&self.options);

        let mut transformer = self.agent.new_transformer();
        let mut child = match Command::new(&binary.path)
            .args(&args)
            .env_clear()
            .envs(&env)
            .current_dir(&self.options.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let err = BridgeError::SpawnFailed {
                    program: binary.path.display().to_string(),
                    reason: e.to_string(),
                };
                tracing::error!(error = %err, "spawn failed");
                let chunks = transformer.fail(&err.to_string());
                self.send_final(chunks, None).await;
                return;
            }
        };

        let pid = child.id();
        self.sessions.set_pid(&self.options.sub_chat_id, self.generation, pid);
        tracing::info!(
            pid,
            binary = %binary.path.display(),
            source = %binary.source,
            cwd = %self.options.cwd.display(),
            resume = self.options.resume_session_id.is_some(),
            "spawned agent"
        );

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_stderr(stderr, self.options.on_stderr.clone())));

        let outcome = self.pump_stdout(&mut child, &mut transformer).await;
        if let Err(stop) = outcome {
            self.stop(stop, Some((&mut child, pid)), &mut transformer).await;
            return;
        }

        let waited = tokio::select! {
            biased;
            () = either_aborted(&mut self.abort, &mut self.caller_abort) => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = waited else {
            self.stop(Stop::Cancelled, Some((&mut child, pid)), &mut transformer).await;
            return;
        };
        // Reaped: the pid may be reused from here on.
        self.sessions.set_pid(&self.options.sub_chat_id, self.generation, None);
        drop(child);
        let tail = join_stderr(stderr_task).await;

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(error = %e, "failed to reap agent");
                let chunks = transformer.fail(&format!("{} failed: {e}", self.agent.binary_name()));
                let _ = self.forward(chunks).await;
                return;
            }
        };
        log_exit(status, &tail);

        if transformer.is_finished() {
            return;
        }
        let chunks = if transformer.state().is_auth_failure(&tail) {
            transformer.fail(&tail)
        } else if !status.success() {
            transformer.fail(&exit_message(self.agent.binary_name(), status, &tail))
        } else {
            transformer.end_of_stream()
        };
        if let Err(stop) = self.forward(chunks).await {
            self.stop(stop, None, &mut transformer).await;
        }
    }

    /// Read stdout to EOF, feeding every complete line to `transformer`.
    async fn pump_stdout(
        &mut self,
        child: &mut Child,
        transformer: &mut A::Transformer,
    ) -> Result<(), Stop> {
        let Some(mut stdout) = child.stdout.take() else {
            return Ok(());
        };
        let mut lines = LineBuffer::new();
        let mut buf = vec![0_u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                biased;
                () = either_aborted(&mut self.abort, &mut self.caller_abort) => {
                    return Err(Stop::Cancelled);
                }
                read = stdout.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    if let Some(line) = lines.finish() {
                        self.handle_line(transformer, &line).await?;
                    }
                    return Ok(());
                }
                Ok(n) => {
                    for line in lines.push(&buf[..n]) {
                        self.handle_line(transformer, &line).await?;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdout read failed");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_line(
        &mut self,
        transformer: &mut A::Transformer,
        line: &str,
    ) -> Result<(), Stop> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            tracing::debug!(line = %preview(line), "discarding non-JSON stdout line");
            return Ok(());
        };
        let event = match serde_json::from_value(value) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, line = %preview(line), "discarding malformed event");
                return Ok(());
            }
        };
        let chunks = transformer.step(event, Instant::now());
        self.forward(chunks).await
    }

    /// Deliver `chunks` in order, giving up as soon as the session is
    /// aborted or the consumer has gone away.
    async fn forward(&mut self, chunks: Vec<Chunk>) -> Result<(), Stop> {
        for chunk in chunks {
            let is_finish = chunk.is_finish();
            let sent = tokio::select! {
                biased;
                () = either_aborted(&mut self.abort, &mut self.caller_abort) => {
                    return Err(Stop::Cancelled);
                }
                sent = self.tx.send(chunk) => sent,
            };
            if sent.is_err() {
                return Err(Stop::Disconnected);
            }
            if is_finish {
                self.finish_sent = true;
            }
        }
        Ok(())
    }

    /// Deliver terminal chunks regardless of abort state.
    async fn send_final(&mut self, chunks: Vec<Chunk>, limit: Option<Duration>) {
        for chunk in chunks {
            let is_finish = chunk.is_finish();
            let sent = match limit {
                Some(limit) => matches!(timeout(limit, self.tx.send(chunk)).await, Ok(Ok(()))),
                None => self.tx.send(chunk).await.is_ok(),
            };
            if !sent {
                tracing::debug!("consumer gone before terminal chunks were delivered");
                return;
            }
            if is_finish {
                self.finish_sent = true;
            }
        }
    }

    /// Tear down a still-unreaped child, if any, and on cancellation close
    /// the stream with a lone `finish` unless one was already delivered.
    async fn stop(
        &mut self,
        stop: Stop,
        child: Option<(&mut Child, Option<u32>)>,
        transformer: &mut A::Transformer,
    ) {
        self.handle.abort();
        if let Some((child, pid)) = child {
            terminate_child(child, pid).await;
            self.sessions.set_pid(&self.options.sub_chat_id, self.generation, None);
        }
        match stop {
            Stop::Cancelled => {
                tracing::info!("session cancelled");
                let mut chunks = transformer.cancel();
                if chunks.is_empty() && !self.finish_sent {
                    chunks.push(Chunk::Finish);
                }
                self.send_final(chunks, Some(FINAL_SEND_TIMEOUT)).await;
            }
            Stop::Disconnected => tracing::info!("consumer dropped the stream, session stopped"),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Error text with the install/login hint appended, when there is one.
fn describe(err: &BridgeError) -> String {
    match err.hint() {
        Some(hint) => format!("{err}. {hint}"),
        None => err.to_string(),
    }
}

fn exit_message(binary: &str, status: ExitStatus, tail: &str) -> String {
    let head = status.code().map_or_else(
        || format!("{binary} was terminated by a signal"),
        |code| format!("{binary} exited with code {code}"),
    );
    if tail.is_empty() {
        head
    } else {
        format!("{head}: {tail}")
    }
}

fn log_exit(status: ExitStatus, tail: &str) {
    if status.success() {
        tracing::info!(exit_code = status.code(), "agent exited");
    } else {
        tracing::warn!(exit_code = status.code(), stderr = %tail, "agent exited with failure");
    }
}

/// Short form of a stdout line for logs.
fn preview(line: &str) -> &str {
    const MAX: usize = 200;
    if line.len() <= MAX {
        return line;
    }
    let mut end = MAX;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// SIGTERM, then a hard kill if the child outlives the grace period.
async fn terminate_child(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        send_terminate(pid);
    }
    match timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(status)) => tracing::info!(exit_code = status.code(), "agent terminated"),
        Ok(Err(e)) => tracing::debug!(error = %e, "wait after terminate failed"),
        Err(_) => {
            tracing::warn!(pid, "agent ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "kill failed");
            }
        }
    }
}

async fn join_stderr(task: Option<JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    match timeout(STDERR_JOIN_TIMEOUT, task).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "stderr reader panicked");
            String::new()
        }
        Err(_) => {
            tracing::debug!("stderr reader still busy, continuing without it");
            String::new()
        }
    }
}

/// Drain stderr line by line into the hook and a bounded tail.
async fn collect_stderr(stderr: ChildStderr, hook: Option<StderrHook>) -> String {
    let mut reader = BufReader::new(stderr);
    let mut tail = StderrTail::default();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\r', '\n']);
                if line.trim().is_empty() {
                    continue;
                }
                tracing::debug!(line, "agent stderr");
                if let Some(hook) = &hook {
                    hook(line);
                }
                tail.push(line);
            }
            Err(e) => {
                tracing::debug!(error = %e, "stderr read failed");
                break;
            }
        }
    }
    tail.joined()
}

/// The last lines of stderr, capped by count and bytes.
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push(&mut self, line: &str) {
        self.bytes += line.len();
        self.lines.push_back(line.to_string());
        while self.lines.len() > STDERR_TAIL_LINES
            || (self.bytes > STDERR_TAIL_BYTES && self.lines.len() > 1)
        {
            if let Some(old) = self.lines.pop_front() {
                self.bytes -= old.len();
            }
        }
    }

    fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}
