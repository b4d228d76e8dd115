//! Catalog of registered providers.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::provider::{AuthStatus, Provider};
use crate::error::{BridgeError, Result};

/// Availability and auth state of one provider at a point in time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: String,
    pub display_name: String,
    pub available: bool,
    pub auth: AuthStatus,
    pub is_default: bool,
    pub checked_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    providers: Vec<Arc<dyn Provider>>,
    default_id: Option<String>,
}

/// Registered providers in registration order, plus a nominal default.
#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if a provider with the same id exists.
    pub fn register(&self, provider: Arc<dyn Provider>) -> Result<()> {
        let mut inner = self.write();
        if inner.providers.iter().any(|p| p.id() == provider.id()) {
            return Err(BridgeError::ConfigInvalid {
                key: "provider".to_string(),
                message: format!("provider '{}' is already registered", provider.id()),
            });
        }
        tracing::debug!(provider = provider.id(), "registered provider");
        inner.providers.push(provider);
        Ok(())
    }

    /// Remove a provider; returns it if it was registered.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn Provider>> {
        let mut inner = self.write();
        let index = inner.providers.iter().position(|p| p.id() == id)?;
        Some(inner.providers.remove(index))
    }

    /// # Errors
    ///
    /// Returns `UnknownProvider` if `id` is not registered.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>> {
        self.read()
            .providers
            .iter()
            .find(|p| p.id() == id)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownProvider(id.to_string()))
    }

    /// Every provider, in registration order.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<dyn Provider>> {
        self.read().providers.clone()
    }

    #[must_use]
    pub fn has(&self, id: &str) -> bool {
        self.read().providers.iter().any(|p| p.id() == id)
    }

    /// Set the nominal default. The id need not be registered yet.
    pub fn set_default(&self, id: impl Into<String>) {
        self.write().default_id = Some(id.into());
    }

    /// The default provider, or the first registered one if the default
    /// was never registered.
    ///
    /// # Errors
    ///
    /// Returns `NoProviders` if the registry is empty.
    pub fn get_default(&self) -> Result<Arc<dyn Provider>> {
        let inner = self.read();
        let nominal = inner
            .default_id
            .as_deref()
            .and_then(|id| inner.providers.iter().find(|p| p.id() == id));
        nominal
            .or_else(|| inner.providers.first())
            .cloned()
            .ok_or(BridgeError::NoProviders)
    }

    /// Probe one provider.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` if `id` is not registered.
    pub async fn get_status(&self, id: &str) -> Result<ProviderStatus> {
        let provider = self.get(id)?;
        let default_id = self.get_default().ok().map(|p| p.id().to_string());
        Ok(probe(provider, default_id.as_deref()).await)
    }

    /// Probe every provider concurrently, in registration order.
    pub async fn get_all_status(&self) -> Vec<ProviderStatus> {
        let providers = self.get_all();
        let default_id = self.get_default().ok().map(|p| p.id().to_string());
        let default_id = default_id.as_deref();
        futures::future::join_all(providers.into_iter().map(|p| probe(p, default_id))).await
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("ProviderRegistry")
            .field(
                "providers",
                &inner.providers.iter().map(|p| p.id().to_string()).collect::<Vec<_>>(),
            )
            .field("default_id", &inner.default_id)
            .finish()
    }
}

/// Availability and auth run side by side; neither has side effects.
async fn probe(provider: Arc<dyn Provider>, default_id: Option<&str>) -> ProviderStatus {
    let (available, auth) = tokio::join!(provider.is_available(), provider.auth_status());
    tracing::debug!(
        provider = provider.id(),
        available,
        authenticated = auth.authenticated,
        "provider status"
    );
    ProviderStatus {
        id: provider.id().to_string(),
        display_name: provider.display_name().to_string(),
        available,
        auth,
        is_default: default_id == Some(provider.id()),
        checked_at: Utc::now(),
    }
}
