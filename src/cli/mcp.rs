//! MCP command implementation.

use crate::cli::args::McpArgs;
use crate::cli::to_json;
use crate::core::registry::ProviderRegistry;
use crate::error::Result;

/// Execute the mcp command. Prints the provider's declared tool servers,
/// or `null` when it has no config for the project.
///
/// # Errors
///
/// Returns error for an unknown provider or an unreadable current
/// directory.
pub async fn execute(args: &McpArgs, registry: &ProviderRegistry, pretty: bool) -> Result<()> {
    let provider = registry.get(&args.provider)?;
    let project = match &args.project {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config = provider.provider_config(&project).await;
    tracing::debug!(
        provider = provider.id(),
        project = %project.display(),
        servers = config.as_ref().map_or(0, |c| c.mcp_servers.len()),
        "read provider config"
    );
    println!("{}", to_json(&config, pretty)?);
    Ok(())
}
