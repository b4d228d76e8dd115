//! Credential lookup for agent providers.
//!
//! Priority, first match wins:
//! 1. the provider's environment variables
//! 2. the OS secret store, under a short list of service aliases
//! 3. on-disk JSON auth files, each checked for known key paths in order
//!
//! Secret values never reach the logs; only their origin does.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;
use serde_json::Value;

/// Where a credential came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CredentialSource {
    /// An environment variable.
    Environment { var: String },
    /// The OS credential store.
    Keychain { service: String },
    /// A JSON file on disk.
    File { path: PathBuf },
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Environment { var } => write!(f, "env:{var}"),
            Self::Keychain { service } => write!(f, "keychain:{service}"),
            Self::File { path } => write!(f, "file:{}", path.display()),
        }
    }
}

/// An opaque bearer value plus its origin.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    value: String,
    pub source: CredentialSource,
    /// True when the value looks like a direct API key rather than an OAuth
    /// or session token.
    pub is_api_key: bool,
}

impl Credential {
    #[must_use]
    pub fn new(value: impl Into<String>, source: CredentialSource, is_api_key: bool) -> Self {
        Self {
            value: value.into(),
            source,
            is_api_key,
        }
    }

    /// The secret itself.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .field("is_api_key", &self.is_api_key)
            .finish()
    }
}

// =============================================================================
// Secret store seam
// =============================================================================

/// Read access to an OS-level secret store.
pub trait SecretStore: Send + Sync {
    /// The secret stored under `service`/`account`, if any.
    fn get(&self, service: &str, account: &str) -> Option<String>;
}

/// The platform keychain via the `keyring` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStore;

impl SecretStore for KeyringStore {
    fn get(&self, service: &str, account: &str) -> Option<String> {
        let entry = keyring::Entry::new(service, account).ok()?;
        match entry.get_password() {
            Ok(secret) => Some(secret),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                tracing::debug!(service, error = %e, "keychain lookup failed");
                None
            }
        }
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    secrets: Mutex<HashMap<(String, String), String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, service: &str, account: &str, secret: &str) {
        if let Ok(mut map) = self.secrets.lock() {
            map.insert((service.to_string(), account.to_string()), secret.to_string());
        }
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, service: &str, account: &str) -> Option<String> {
        self.secrets
            .lock()
            .ok()?
            .get(&(service.to_string(), account.to_string()))
            .cloned()
    }
}

// =============================================================================
// Per-provider lookup rules
// =============================================================================

/// A keychain entry to try.
#[derive(Debug, Clone)]
pub struct KeychainEntry {
    pub service: String,
    pub account: String,
}

/// Where and how to look for one provider's credential.
#[derive(Debug, Clone)]
pub struct CredentialSpec {
    /// Provider id, used as the cache key.
    pub provider: String,
    /// Environment variables, in priority order.
    pub env_vars: Vec<String>,
    /// Keychain entries, in priority order.
    pub keychain: Vec<KeychainEntry>,
    /// JSON auth files, in priority order.
    pub files: Vec<PathBuf>,
    /// Key paths inside a JSON payload, API keys before token fields.
    pub key_paths: Vec<Vec<String>>,
    /// Prefix that marks a direct API key.
    pub api_key_prefix: String,
}

impl CredentialSpec {
    /// Classify a value by the API-key prefix.
    #[must_use]
    pub fn is_api_key(&self, value: &str) -> bool {
        !self.api_key_prefix.is_empty() && value.starts_with(&self.api_key_prefix)
    }

    fn credential(&self, value: String, source: CredentialSource) -> Credential {
        let is_api_key = self.is_api_key(&value);
        Credential::new(value, source, is_api_key)
    }
}

/// The login name used as the keychain account.
#[must_use]
pub fn current_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "default".to_string())
}

/// Walk `path` into `value`, returning a non-empty string leaf.
fn lookup_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a str> {
    let mut cur = value;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// First recognized key in a JSON payload, or the payload itself if it is
/// not JSON at all.
fn extract_secret(payload: &str, key_paths: &[Vec<String>]) -> Option<String> {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::String(s)) => Some(s).filter(|s| !s.is_empty()),
        Ok(json @ Value::Object(_)) => key_paths
            .iter()
            .find_map(|path| lookup_path(&json, path))
            .map(str::to_string),
        Ok(_) => None,
        Err(_) => Some(trimmed.to_string()),
    }
}

fn read_file_secret(path: &Path, key_paths: &[Vec<String>]) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            tracing::trace!(path = %path.display(), "credential file absent");
            return None;
        }
    };
    let Ok(json) = serde_json::from_str::<Value>(&content) else {
        tracing::debug!(path = %path.display(), "credential file is not JSON, skipping");
        return None;
    };
    key_paths
        .iter()
        .find_map(|p| lookup_path(&json, p))
        .map(str::to_string)
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolves and caches credentials per provider.
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
    env: Option<HashMap<String, String>>,
    cache: Mutex<HashMap<String, Option<Credential>>>,
}

impl CredentialResolver {
    /// A resolver over the given secret store and the process environment.
    #[must_use]
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self {
            store,
            env: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Read environment variables from `env` instead of the process.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// The process-wide instance, backed by the OS keychain.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<CredentialResolver>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new(Arc::new(KeyringStore)))))
    }

    /// Forget every cached lookup. Test/debug hook.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn env_var(&self, key: &str) -> Option<String> {
        let value = match &self.env {
            Some(env) => env.get(key).cloned(),
            None => std::env::var(key).ok(),
        };
        value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    /// Resolve the credential described by `spec`. Never fails.
    pub fn resolve(&self, spec: &CredentialSpec) -> Option<Credential> {
        if let Some(hit) = self
            .cache
            .lock()
            .ok()
            .and_then(|c| c.get(&spec.provider).cloned())
        {
            return hit;
        }

        let result = self.search(spec);
        match &result {
            Some(c) => tracing::debug!(
                provider = %spec.provider,
                source = %c.source,
                api_key = c.is_api_key,
                "resolved credential"
            ),
            None => tracing::debug!(provider = %spec.provider, "no credential found"),
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(spec.provider.clone(), result.clone());
        }
        result
    }

    fn search(&self, spec: &CredentialSpec) -> Option<Credential> {
        for var in &spec.env_vars {
            if let Some(value) = self.env_var(var) {
                return Some(
                    spec.credential(value, CredentialSource::Environment { var: var.clone() }),
                );
            }
        }

        for entry in &spec.keychain {
            let Some(payload) = self.store.get(&entry.service, &entry.account) else {
                continue;
            };
            if let Some(value) = extract_secret(&payload, &spec.key_paths) {
                return Some(spec.credential(
                    value,
                    CredentialSource::Keychain {
                        service: entry.service.clone(),
                    },
                ));
            }
        }

        for path in &spec.files {
            if let Some(value) = read_file_secret(path, &spec.key_paths) {
                return Some(spec.credential(value, CredentialSource::File { path: path.clone() }));
            }
        }

        None
    }
}
