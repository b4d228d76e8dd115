//! The provider capability contract and its supporting types.
//!
//! A provider wraps one external agent CLI. Callers only ever see this
//! trait, the [`ChatOptions`] they pass in, and the [`ChatStream`] of
//! canonical chunks they get back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::binary::{BinaryResolution, BinaryResolver};
use crate::core::chunk::Chunk;
use crate::core::credentials::CredentialResolver;
use crate::core::session::{AbortHandle, AbortSignal, SessionRegistry};
use crate::core::shell_env::{EnvMap, ShellEnvironment};
use crate::storage::config::{DEFAULT_STREAM_BUFFER, ResolvedConfig};

// =============================================================================
// Session options
// =============================================================================

/// Acting on the workspace vs. only planning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Agent,
    Plan,
}

/// How much of the machine the agent may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl SandboxMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::DangerFullAccess => "danger-full-access",
        }
    }
}

/// When the agent must stop and ask before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    Untrusted,
    OnFailure,
    OnRequest,
    Never,
}

impl ApprovalPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Untrusted => "untrusted",
            Self::OnFailure => "on-failure",
            Self::OnRequest => "on-request",
            Self::Never => "never",
        }
    }
}

/// Reasoning budget hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Receives raw stderr lines as they arrive.
pub type StderrHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything one `chat()` call needs.
#[derive(Clone)]
pub struct ChatOptions {
    pub chat_id: String,
    pub sub_chat_id: String,
    pub prompt: String,
    pub cwd: PathBuf,
    /// Prior provider session to resume.
    pub resume_session_id: Option<String>,
    pub mode: ChatMode,
    pub model: Option<String>,
    pub sandbox: Option<SandboxMode>,
    pub approval: Option<ApprovalPolicy>,
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Extra child environment; an empty value removes the variable.
    pub env: EnvMap,
    /// Caller-side cancellation.
    pub abort: Option<AbortSignal>,
    pub on_stderr: Option<StderrHook>,
}

impl ChatOptions {
    #[must_use]
    pub fn new(sub_chat_id: impl Into<String>, prompt: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        let sub_chat_id = sub_chat_id.into();
        Self {
            chat_id: sub_chat_id.clone(),
            sub_chat_id,
            prompt: prompt.into(),
            cwd: cwd.into(),
            resume_session_id: None,
            mode: ChatMode::Agent,
            model: None,
            sandbox: None,
            approval: None,
            reasoning_effort: None,
            env: EnvMap::new(),
            abort: None,
            on_stderr: None,
        }
    }

    #[must_use]
    pub fn with_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = chat_id.into();
        self
    }

    #[must_use]
    pub fn with_resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume_session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub const fn with_sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    #[must_use]
    pub const fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = Some(approval);
        self
    }

    #[must_use]
    pub const fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_abort(mut self, signal: AbortSignal) -> Self {
        self.abort = Some(signal);
        self
    }

    #[must_use]
    pub fn with_stderr_hook(mut self, hook: StderrHook) -> Self {
        self.on_stderr = Some(hook);
        self
    }
}

impl fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatOptions")
            .field("chat_id", &self.chat_id)
            .field("sub_chat_id", &self.sub_chat_id)
            .field("prompt_len", &self.prompt.len())
            .field("cwd", &self.cwd)
            .field("resume_session_id", &self.resume_session_id)
            .field("mode", &self.mode)
            .field("model", &self.model)
            .field("sandbox", &self.sandbox)
            .field("approval", &self.approval)
            .field("reasoning_effort", &self.reasoning_effort)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("has_abort", &self.abort.is_some())
            .field("has_stderr_hook", &self.on_stderr.is_some())
            .finish()
    }
}

// =============================================================================
// Chunk stream
// =============================================================================

/// The canonical chunk sequence of one session.
///
/// Dropping the stream cancels the session. Once the session is aborted,
/// buffered chunks other than `finish` are discarded.
pub struct ChatStream {
    rx: mpsc::Receiver<Chunk>,
    abort: Option<AbortHandle>,
    done: bool,
}

impl ChatStream {
    pub(crate) const fn new(rx: mpsc::Receiver<Chunk>, abort: Option<AbortHandle>) -> Self {
        Self {
            rx,
            abort,
            done: false,
        }
    }

    /// A stream that yields exactly `chunks` and ends.
    #[must_use]
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk.
            let _ = tx.try_send(chunk);
        }
        Self::new(rx, None)
    }

    /// Handle that cancels this session.
    #[must_use]
    pub fn abort_handle(&self) -> Option<AbortHandle> {
        self.abort.clone()
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(AbortHandle::is_aborted)
    }

    /// Next chunk, or `None` once the session is over.
    pub async fn next_chunk(&mut self) -> Option<Chunk> {
        std::future::poll_fn(|cx| self.poll_chunk(cx)).await
    }

    /// Drain the whole session.
    pub async fn collect_all(mut self) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            out.push(chunk);
        }
        out
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        if self.done {
            return Poll::Ready(None);
        }
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    if self.aborted() && !chunk.is_finish() {
                        continue;
                    }
                    if chunk.is_finish() {
                        self.done = true;
                    }
                    return Poll::Ready(Some(chunk));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Stream for ChatStream {
    type Item = Chunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        self.get_mut().poll_chunk(cx)
    }
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("done", &self.done)
            .field("aborted", &self.aborted())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Status and provider config
// =============================================================================

/// Kind of credential a provider would use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    ApiKey,
    Token,
}

/// Result of `auth_status()`. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthStatus {
    #[must_use]
    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            method: None,
            source: None,
            error: Some(message.into()),
        }
    }
}

/// One external tool server declared in a provider's own config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Variable names only; values may be secrets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_keys: Vec<String>,
    /// File the declaration was read from.
    pub source: PathBuf,
}

/// Provider-specific auxiliary configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub mcp_servers: Vec<McpServer>,
}

// =============================================================================
// Shared services
// =============================================================================

/// Resolvers and settings every provider draws on.
#[derive(Clone)]
pub struct ProviderContext {
    pub binaries: Arc<BinaryResolver>,
    pub credentials: Arc<CredentialResolver>,
    pub shell_env: Arc<ShellEnvironment>,
    /// Live sessions, shared by every provider built from this context so
    /// one `sub_chat_id` has at most one session whichever provider runs it.
    pub sessions: Arc<SessionRegistry>,
    /// Per-provider child environment overrides.
    pub provider_env: BTreeMap<String, EnvMap>,
    /// Chunk channel capacity per session.
    pub stream_buffer: usize,
}

impl ProviderContext {
    /// A context with its own, empty session registry.
    #[must_use]
    pub fn new(
        binaries: Arc<BinaryResolver>,
        credentials: Arc<CredentialResolver>,
        shell_env: Arc<ShellEnvironment>,
    ) -> Self {
        Self {
            binaries,
            credentials,
            shell_env,
            sessions: Arc::new(SessionRegistry::new()),
            provider_env: BTreeMap::new(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// The process-wide resolvers and session registry with default
    /// settings.
    #[must_use]
    pub fn global() -> Self {
        Self::new(
            BinaryResolver::global(),
            CredentialResolver::global(),
            ShellEnvironment::global(),
        )
        .with_sessions(SessionRegistry::global())
    }

    /// Context for the given resolved configuration. The binary resolver
    /// is built fresh so configured paths apply; the shell and credential
    /// caches and the session registry are the process-wide ones.
    #[must_use]
    pub fn from_config(config: &ResolvedConfig, provider_ids: &[&str]) -> Self {
        let mut binaries = BinaryResolver::new()
            .with_bundled_dir(config.bundled_bin_dir.clone())
            .with_timeout(config.probe_timeout);
        for id in provider_ids {
            if let Some(path) = config.binary_override(id) {
                binaries = binaries.with_configured(*id, path);
            }
        }
        let provider_env = provider_ids
            .iter()
            .map(|id| ((*id).to_string(), config.provider_env(id)))
            .filter(|(_, env)| !env.is_empty())
            .collect();
        Self {
            binaries: Arc::new(binaries),
            credentials: CredentialResolver::global(),
            shell_env: ShellEnvironment::global(),
            sessions: SessionRegistry::global(),
            provider_env,
            stream_buffer: config.stream_buffer,
        }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    #[must_use]
    pub fn with_stream_buffer(mut self, capacity: usize) -> Self {
        self.stream_buffer = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_provider_env(mut self, provider_id: &str, env: EnvMap) -> Self {
        self.provider_env.insert(provider_id.to_string(), env);
        self
    }

    /// Configured overrides for one provider.
    #[must_use]
    pub fn env_for(&self, provider_id: &str) -> EnvMap {
        self.provider_env.get(provider_id).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("provider_env", &self.provider_env.keys().collect::<Vec<_>>())
            .field("stream_buffer", &self.stream_buffer)
            .field("live_sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Capability contract
// =============================================================================

/// What every agent provider implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, e.g. `codex`.
    fn id(&self) -> &str;

    /// Human-facing name.
    fn display_name(&self) -> &str;

    /// Whether the agent binary can be found.
    async fn is_available(&self) -> bool;

    /// Where the agent binary was found, for diagnostics.
    async fn binary(&self) -> Option<BinaryResolution> {
        None
    }

    /// Whether a usable credential exists.
    async fn auth_status(&self) -> AuthStatus;

    /// Start a session. Never fails: every failure is reported in-band and
    /// the stream always ends with `finish` unless resolution failed first.
    async fn chat(&self, options: ChatOptions) -> ChatStream;

    /// Cancel a session. Unknown ids are a no-op.
    fn cancel(&self, sub_chat_id: &str);

    fn is_active(&self, sub_chat_id: &str) -> bool;

    /// Auxiliary configuration for a project, if the provider has any.
    async fn provider_config(&self, _project: &Path) -> Option<ProviderConfig> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::abort_pair;
    use futures::StreamExt;

    #[tokio::test]
    async fn from_chunks_yields_exactly_those() {
        let stream = ChatStream::from_chunks(vec![Chunk::error("missing"), Chunk::Finish]);
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks, vec![Chunk::error("missing"), Chunk::Finish]);
    }

    #[tokio::test]
    async fn aborted_stream_skips_to_finish() {
        let (tx, rx) = mpsc::channel(8);
        let (handle, _signal) = abort_pair();
        let mut stream = ChatStream::new(rx, Some(handle.clone()));
        tx.send(Chunk::StartStep).await.unwrap();
        tx.send(Chunk::TextStart { id: "a".into() }).await.unwrap();
        tx.send(Chunk::Finish).await.unwrap();
        tx.send(Chunk::Finish).await.unwrap();

        assert_eq!(stream.next_chunk().await, Some(Chunk::StartStep));
        handle.abort();
        assert_eq!(stream.next_chunk().await, Some(Chunk::Finish));
        // Nothing after finish, even a stray duplicate.
        assert_eq!(stream.next_chunk().await, None);
    }

    #[test]
    fn options_builder_and_redacted_debug() {
        let opts = ChatOptions::new("sub-1", "secret plan", "/tmp")
            .with_mode(ChatMode::Plan)
            .with_resume("thread-9")
            .with_env("FOO", "");
        assert_eq!(opts.chat_id, "sub-1");
        assert_eq!(opts.resume_session_id.as_deref(), Some("thread-9"));
        let shown = format!("{opts:?}");
        assert!(!shown.contains("secret plan"));
        assert!(shown.contains("FOO"));
    }

    #[test]
    fn auth_status_serializes_camel_case() {
        let status = AuthStatus {
            authenticated: true,
            method: Some(AuthMethod::ApiKey),
            source: Some("env:OPENAI_API_KEY".into()),
            error: None,
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["method"], "api-key");
        assert!(v.get("error").is_none());
    }

    #[test]
    fn global_contexts_share_one_session_registry() {
        let a = ProviderContext::global();
        let b = ProviderContext::global();
        assert!(Arc::ptr_eq(&a.sessions, &b.sessions));

        let isolated = ProviderContext::new(
            BinaryResolver::global(),
            CredentialResolver::global(),
            ShellEnvironment::global(),
        );
        assert!(!Arc::ptr_eq(&a.sessions, &isolated.sessions));
        let shared = isolated.with_sessions(Arc::clone(&a.sessions));
        assert!(Arc::ptr_eq(&a.sessions, &shared.sessions));
    }
}
