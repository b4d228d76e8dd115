//! Concrete agent providers.
//!
//! Each provider has its own submodule with a raw event union, an event
//! transformer, an argument rule table and the [`Provider`] implementation.

pub mod claude;
pub mod codex;
pub mod flags;

use std::sync::Arc;

pub use crate::core::provider::Provider;
pub use claude::ClaudeProvider;
pub use codex::CodexProvider;

use crate::core::provider::ProviderContext;
use crate::core::registry::ProviderRegistry;
use crate::error::Result;

/// Ids of the built-in providers, in registration order.
pub const BUILTIN_IDS: &[&str] = &[codex::ID, claude::ID];

/// A registry holding every built-in provider.
///
/// # Errors
///
/// Returns error only if a built-in id were registered twice.
pub fn builtin_registry(ctx: &ProviderContext) -> Result<ProviderRegistry> {
    let registry = ProviderRegistry::new();
    registry.register(Arc::new(CodexProvider::new(ctx.clone())))?;
    registry.register(Arc::new(ClaudeProvider::new(ctx.clone())))?;
    Ok(registry)
}
