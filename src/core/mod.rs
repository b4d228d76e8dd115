//! Provider-agnostic session machinery.

pub mod binary;
pub mod chunk;
pub mod cli_runner;
pub mod credentials;
pub mod line_buffer;
pub mod logging;
pub mod process;
pub mod provider;
pub mod registry;
pub mod session;
pub mod shell_env;
pub mod transform;

pub use binary::{BinaryResolution, BinaryResolver, BinarySource};
pub use chunk::{Chunk, MessageMetadata, Usage};
pub use credentials::{
    Credential, CredentialResolver, CredentialSource, CredentialSpec, KeyringStore, MemoryStore,
    SecretStore,
};
pub use line_buffer::LineBuffer;
pub use process::{AgentCli, ProcessSessionManager};
pub use provider::{
    ApprovalPolicy, AuthMethod, AuthStatus, ChatMode, ChatOptions, ChatStream, McpServer,
    Provider, ProviderConfig, ProviderContext, ReasoningEffort, SandboxMode, StderrHook,
};
pub use registry::{ProviderRegistry, ProviderStatus};
pub use session::{AbortHandle, AbortSignal, SessionInfo, SessionRegistry, abort_pair};
pub use shell_env::{ApiKeyOverride, EnvMap, ShellEnvironment, build_runtime_environment};
pub use transform::{StreamState, Transformer};
