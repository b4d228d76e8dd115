//! Resolve command implementation.
//!
//! Shows where a provider's binary and credential come from, without
//! printing the credential itself.

use serde::Serialize;

use crate::cli::args::ResolveArgs;
use crate::cli::to_json;
use crate::core::binary::BinaryResolution;
use crate::core::provider::AuthStatus;
use crate::core::registry::ProviderRegistry;
use crate::error::{BridgeError, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveReport {
    pub provider: String,
    pub binary: Option<BinaryResolution>,
    pub auth: AuthStatus,
}

/// Execute the resolve command.
///
/// The report is printed even when the binary is missing; the command then
/// fails with `BinaryNotFound`.
///
/// # Errors
///
/// Returns error for an unknown provider or a missing binary.
pub async fn execute(args: &ResolveArgs, registry: &ProviderRegistry, pretty: bool) -> Result<()> {
    let provider = registry.get(&args.provider)?;
    let (binary, auth) = tokio::join!(provider.binary(), provider.auth_status());
    let report = ResolveReport {
        provider: provider.id().to_string(),
        binary,
        auth,
    };
    println!("{}", to_json(&report, pretty)?);

    if report.binary.is_none() {
        return Err(BridgeError::BinaryNotFound {
            provider: report.provider,
        });
    }
    Ok(())
}
