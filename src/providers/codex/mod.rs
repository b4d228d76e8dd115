//! Codex (OpenAI) provider.
//!
//! Drives `codex exec --json` and translates its thread/item/turn events.
//! Credentials come from `OPENAI_API_KEY`, the OS keychain, or
//! `$CODEX_HOME/auth.json`; tool servers are declared in
//! `$CODEX_HOME/config.toml`.

pub mod args;
pub mod events;
pub mod transform;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::binary::BinaryResolution;
use crate::core::credentials::{Credential, CredentialSpec, KeychainEntry, current_user};
use crate::core::process::{AgentCli, ProcessSessionManager};
use crate::core::provider::{
    AuthStatus, ChatOptions, ChatStream, McpServer, Provider, ProviderConfig, ProviderContext,
};
use crate::core::session::SessionRegistry;
use crate::core::shell_env::ApiKeyOverride;
use crate::storage::paths;

pub use transform::CodexTransformer;

/// Provider id.
pub const ID: &str = "codex";

/// CLI binary name.
const CLI_NAME: &str = "codex";

/// Variable the CLI reads a direct API key from.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

const API_KEY_PREFIX: &str = "sk-";

// =============================================================================
// CLI description
// =============================================================================

/// How `codex` is found, authenticated and invoked.
#[derive(Debug, Clone)]
pub struct CodexCli {
    home: Option<PathBuf>,
}

impl CodexCli {
    /// `home` is the codex config directory (`$CODEX_HOME` or `~/.codex`).
    #[must_use]
    pub const fn new(home: Option<PathBuf>) -> Self {
        Self { home }
    }

    #[must_use]
    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }
}

impl AgentCli for CodexCli {
    type Transformer = CodexTransformer;

    fn id(&self) -> &'static str {
        ID
    }

    fn display_name(&self) -> &'static str {
        "Codex"
    }

    fn binary_name(&self) -> &'static str {
        CLI_NAME
    }

    fn credential_spec(&self) -> CredentialSpec {
        CredentialSpec {
            provider: ID.to_string(),
            env_vars: vec![API_KEY_VAR.to_string(), "CODEX_API_KEY".to_string()],
            keychain: vec![
                KeychainEntry {
                    service: "agentbridge".to_string(),
                    account: ID.to_string(),
                },
                KeychainEntry {
                    service: "Codex Auth".to_string(),
                    account: current_user(),
                },
            ],
            files: self
                .home
                .iter()
                .map(|home| home.join("auth.json"))
                .collect(),
            key_paths: vec![
                vec!["OPENAI_API_KEY".to_string()],
                vec!["tokens".to_string(), "access_token".to_string()],
            ],
            api_key_prefix: API_KEY_PREFIX.to_string(),
        }
    }

    fn build_args(&self, options: &ChatOptions) -> Vec<String> {
        args::build_args(options)
    }

    /// Only a direct API key is passed on; with a login token the CLI
    /// reads its own `auth.json`.
    fn credential_env(&self, credential: &Credential) -> Option<ApiKeyOverride> {
        credential.is_api_key.then(|| ApiKeyOverride {
            var: API_KEY_VAR.to_string(),
            value: credential.expose().to_string(),
        })
    }

    fn new_transformer(&self) -> CodexTransformer {
        CodexTransformer::new()
    }
}

// =============================================================================
// Provider
// =============================================================================

/// The codex provider.
pub struct CodexProvider {
    manager: ProcessSessionManager<CodexCli>,
}

impl CodexProvider {
    /// Provider using `$CODEX_HOME` (or `~/.codex`).
    #[must_use]
    pub fn new(ctx: ProviderContext) -> Self {
        Self::with_home(ctx, paths::codex_home())
    }

    #[must_use]
    pub fn with_home(ctx: ProviderContext, home: Option<PathBuf>) -> Self {
        Self {
            manager: ProcessSessionManager::new(CodexCli::new(home), ctx),
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &std::sync::Arc<SessionRegistry> {
        self.manager.sessions()
    }
}

#[async_trait]
impl Provider for CodexProvider {
    fn id(&self) -> &str {
        ID
    }

    fn display_name(&self) -> &str {
        self.manager.agent().display_name()
    }

    async fn is_available(&self) -> bool {
        self.manager.is_available().await
    }

    async fn binary(&self) -> Option<BinaryResolution> {
        self.manager.binary().await
    }

    async fn auth_status(&self) -> AuthStatus {
        self.manager.auth_status()
    }

    async fn chat(&self, options: ChatOptions) -> ChatStream {
        self.manager.chat(options)
    }

    fn cancel(&self, sub_chat_id: &str) {
        self.manager.cancel(sub_chat_id);
    }

    fn is_active(&self, sub_chat_id: &str) -> bool {
        self.manager.is_active(sub_chat_id)
    }

    /// Codex tool servers are global; `project` does not narrow them.
    async fn provider_config(&self, _project: &Path) -> Option<ProviderConfig> {
        let path = self.manager.agent().home()?.join("config.toml");
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(_) => {
                tracing::debug!(path = %path.display(), "codex config absent");
                return None;
            }
        };
        match parse_mcp_servers(&content, &path) {
            Ok(mcp_servers) => Some(ProviderConfig { mcp_servers }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable codex config");
                None
            }
        }
    }
}

// =============================================================================
// config.toml
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct CodexConfigFile {
    #[serde(default)]
    mcp_servers: BTreeMap<String, McpEntry>,
}

#[derive(Debug, Deserialize)]
struct McpEntry {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, toml::Value>,
}

/// `[mcp_servers.<name>]` tables, sorted by name. Unrelated keys are ignored.
///
/// # Errors
///
/// Returns error if `content` is not valid TOML or a server table is malformed.
pub fn parse_mcp_servers(content: &str, source: &Path) -> Result<Vec<McpServer>, toml::de::Error> {
    let file: CodexConfigFile = toml::from_str(content)?;
    Ok(file
        .mcp_servers
        .into_iter()
        .map(|(name, entry)| McpServer {
            name,
            command: entry.command,
            args: entry.args,
            url: entry.url,
            env_keys: entry.env.into_keys().collect(),
            source: source.to_path_buf(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::CredentialSource;

    #[test]
    fn parses_mcp_server_tables() {
        let content = r#"
model = "gpt-5"

[mcp_servers.docs]
command = "npx"
args = ["-y", "docs-mcp"]
env = { DOCS_TOKEN = "secret" }

[mcp_servers.remote]
url = "https://mcp.example.com"
"#;
        let servers = parse_mcp_servers(content, Path::new("/h/config.toml")).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].name, "docs");
        assert_eq!(servers[0].command.as_deref(), Some("npx"));
        assert_eq!(servers[0].env_keys, vec!["DOCS_TOKEN"]);
        assert_eq!(servers[1].url.as_deref(), Some("https://mcp.example.com"));
        assert_eq!(servers[1].source, PathBuf::from("/h/config.toml"));
    }

    #[test]
    fn config_without_servers_is_empty() {
        assert!(parse_mcp_servers("model = \"o3\"\n", Path::new("c")).unwrap().is_empty());
        assert!(parse_mcp_servers("[[[", Path::new("c")).is_err());
    }

    #[test]
    fn only_api_keys_are_injected() {
        let cli = CodexCli::new(None);
        let source = CredentialSource::Environment {
            var: API_KEY_VAR.into(),
        };
        let key = Credential::new("sk-abc", source.clone(), true);
        let token = Credential::new("eyJhbGciOi", source, false);
        assert_eq!(
            cli.credential_env(&key),
            Some(ApiKeyOverride {
                var: "OPENAI_API_KEY".into(),
                value: "sk-abc".into()
            })
        );
        assert_eq!(cli.credential_env(&token), None);
    }

    #[test]
    fn credential_spec_points_at_auth_json() {
        let cli = CodexCli::new(Some(PathBuf::from("/home/u/.codex")));
        let spec = cli.credential_spec();
        assert_eq!(spec.env_vars[0], "OPENAI_API_KEY");
        assert_eq!(spec.files, vec![PathBuf::from("/home/u/.codex/auth.json")]);
        assert!(spec.is_api_key("sk-proj-123"));
        assert!(!spec.is_api_key("eyJ0"));
    }
}
