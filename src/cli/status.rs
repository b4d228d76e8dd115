//! Status command implementation.

use crate::cli::args::StatusArgs;
use crate::cli::to_json;
use crate::core::registry::ProviderRegistry;
use crate::error::Result;

/// Execute the status command. Prints a JSON array of provider statuses.
///
/// # Errors
///
/// Returns error for an unknown provider id.
pub async fn execute(args: &StatusArgs, registry: &ProviderRegistry, pretty: bool) -> Result<()> {
    let statuses = match &args.provider {
        Some(id) => vec![registry.get_status(id).await?],
        None => registry.get_all_status().await,
    };
    tracing::debug!(count = statuses.len(), "collected provider status");
    println!("{}", to_json(&statuses, pretty)?);
    Ok(())
}
