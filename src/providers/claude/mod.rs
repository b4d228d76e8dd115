//! Claude (Anthropic) provider.
//!
//! Drives `claude -p --output-format stream-json --verbose`. Credentials
//! come from `ANTHROPIC_API_KEY`/`CLAUDE_CODE_OAUTH_TOKEN`, the OS keychain
//! (`Claude Code-credentials`), `<config dir>/.credentials.json` or
//! `~/.claude.json`. Tool servers are declared in `<project>/.mcp.json`
//! and in `~/.claude.json`.

pub mod args;
pub mod events;
pub mod transform;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::binary::BinaryResolution;
use crate::core::credentials::{
    Credential, CredentialSource, CredentialSpec, KeychainEntry, current_user,
};
use crate::core::process::{AgentCli, ProcessSessionManager};
use crate::core::provider::{
    AuthStatus, ChatOptions, ChatStream, McpServer, Provider, ProviderConfig, ProviderContext,
};
use crate::core::session::SessionRegistry;
use crate::core::shell_env::ApiKeyOverride;
use crate::storage::paths;

pub use transform::ClaudeTransformer;

/// Provider id.
pub const ID: &str = "claude";

/// CLI binary name.
const CLI_NAME: &str = "claude";

/// Variable the CLI reads a direct API key from.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Variable the CLI reads an OAuth token from.
pub const OAUTH_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

const API_KEY_PREFIX: &str = "sk-ant-api";

// =============================================================================
// CLI description
// =============================================================================

/// How `claude` is found, authenticated and invoked.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    config_dir: Option<PathBuf>,
    state_file: Option<PathBuf>,
}

impl ClaudeCli {
    #[must_use]
    pub const fn new(config_dir: Option<PathBuf>, state_file: Option<PathBuf>) -> Self {
        Self {
            config_dir,
            state_file,
        }
    }

    #[must_use]
    pub fn state_file(&self) -> Option<&Path> {
        self.state_file.as_deref()
    }
}

impl AgentCli for ClaudeCli {
    type Transformer = ClaudeTransformer;

    fn id(&self) -> &'static str {
        ID
    }

    fn display_name(&self) -> &'static str {
        "Claude"
    }

    fn binary_name(&self) -> &'static str {
        CLI_NAME
    }

    fn credential_spec(&self) -> CredentialSpec {
        let mut files: Vec<PathBuf> = self
            .config_dir
            .iter()
            .map(|dir| dir.join(".credentials.json"))
            .collect();
        files.extend(self.state_file.iter().cloned());
        CredentialSpec {
            provider: ID.to_string(),
            env_vars: vec![API_KEY_VAR.to_string(), OAUTH_TOKEN_VAR.to_string()],
            keychain: vec![
                KeychainEntry {
                    service: "Claude Code-credentials".to_string(),
                    account: current_user(),
                },
                KeychainEntry {
                    service: "agentbridge".to_string(),
                    account: ID.to_string(),
                },
            ],
            files,
            key_paths: vec![
                vec!["apiKey".to_string()],
                vec!["primaryApiKey".to_string()],
                vec!["claudeAiOauth".to_string(), "accessToken".to_string()],
            ],
            api_key_prefix: API_KEY_PREFIX.to_string(),
        }
    }

    fn build_args(&self, options: &ChatOptions) -> Vec<String> {
        args::build_args(options)
    }

    /// API keys always travel as `ANTHROPIC_API_KEY`. An OAuth token is
    /// passed only when the caller supplied it through the environment; a
    /// login token from the keychain or `.credentials.json` is short-lived
    /// and the CLI refreshes it itself.
    fn credential_env(&self, credential: &Credential) -> Option<ApiKeyOverride> {
        let var = if credential.is_api_key {
            API_KEY_VAR
        } else if matches!(credential.source, CredentialSource::Environment { .. }) {
            OAUTH_TOKEN_VAR
        } else {
            return None;
        };
        Some(ApiKeyOverride {
            var: var.to_string(),
            value: credential.expose().to_string(),
        })
    }

    fn new_transformer(&self) -> ClaudeTransformer {
        ClaudeTransformer::new()
    }
}

// =============================================================================
// Provider
// =============================================================================

/// The claude provider.
pub struct ClaudeProvider {
    manager: ProcessSessionManager<ClaudeCli>,
}

impl ClaudeProvider {
    /// Provider using `$CLAUDE_CONFIG_DIR` (or `~/.claude`) and `~/.claude.json`.
    #[must_use]
    pub fn new(ctx: ProviderContext) -> Self {
        Self::with_paths(ctx, paths::claude_config_dir(), paths::claude_state_file())
    }

    #[must_use]
    pub fn with_paths(
        ctx: ProviderContext,
        config_dir: Option<PathBuf>,
        state_file: Option<PathBuf>,
    ) -> Self {
        Self {
            manager: ProcessSessionManager::new(ClaudeCli::new(config_dir, state_file), ctx),
        }
    }

    #[must_use]
    pub const fn sessions(&self) -> &std::sync::Arc<SessionRegistry> {
        self.manager.sessions()
    }
}

#[async_trait]
impl Provider for ClaudeProvider {
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

    async fn provider_config(&self, project: &Path) -> Option<ProviderConfig> {
        let project_file = project.join(".mcp.json");
        let mut sources = vec![(project_file.clone(), read_json(&project_file).await)];
        if let Some(state) = self.manager.agent().state_file() {
            sources.push((state.to_path_buf(), read_json(state).await));
        }
        if sources.iter().all(|(_, json)| json.is_none()) {
            return None;
        }

        let mut servers: Vec<McpServer> = Vec::new();
        for (path, json) in &sources {
            let Some(json) = json else { continue };
            let found = if *path == project_file {
                servers_in(json.get("mcpServers"), path)
            } else {
                let mut found = project_entry(json, project)
                    .map(|p| servers_in(p.get("mcpServers"), path))
                    .unwrap_or_default();
                found.extend(servers_in(json.get("mcpServers"), path));
                found
            };
            for server in found {
                if !servers.iter().any(|s| s.name == server.name) {
                    servers.push(server);
                }
            }
        }
        Some(ProviderConfig {
            mcp_servers: servers,
        })
    }
}

// =============================================================================
// MCP declarations
// =============================================================================

#[derive(Debug, Deserialize)]
struct McpEntry {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
}

async fn read_json(path: &Path) -> Option<Value> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable claude config");
            None
        }
    }
}

/// The `projects` entry of `~/.claude.json` for `project`.
fn project_entry<'a>(state: &'a Value, project: &Path) -> Option<&'a Value> {
    let projects = state.get("projects")?.as_object()?;
    let key = project.to_string_lossy();
    projects.get(key.as_ref()).or_else(|| {
        let trimmed = key.trim_end_matches('/');
        projects.get(trimmed)
    })
}

/// Servers of one `mcpServers` object, sorted by name. Malformed entries
/// are skipped.
#[must_use]
pub fn servers_in(map: Option<&Value>, source: &Path) -> Vec<McpServer> {
    let Some(map) = map.and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut servers: Vec<McpServer> = map
        .iter()
        .filter_map(|(name, entry)| {
            match serde_json::from_value::<McpEntry>(entry.clone()) {
                Ok(entry) => Some(McpServer {
                    name: name.clone(),
                    command: entry.command,
                    args: entry.args,
                    url: entry.url,
                    env_keys: entry.env.into_keys().collect(),
                    source: source.to_path_buf(),
                }),
                Err(e) => {
                    tracing::debug!(server = %name, error = %e, "skipping malformed MCP entry");
                    None
                }
            }
        })
        .collect();
    servers.sort_by(|a, b| a.name.cmp(&b.name));
    servers
}
