//! agentbridge - drive CLI coding agents behind one chunk stream.
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use agentbridge::cli::{Cli, Commands};
use agentbridge::core::logging;
use agentbridge::core::provider::ProviderContext;
use agentbridge::providers::{BUILTIN_IDS, builtin_registry};
use agentbridge::storage::config::ResolvedConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings =
        logging::LogSettings::resolve(cli.log_level.as_deref(), cli.json_output, cli.verbose);
    logging::init(&settings);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(code = e.error_code(), "{}", e);
            eprintln!("error[{}]: {e}", e.error_code());
            if let Some(hint) = e.hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> agentbridge::Result<()> {
    let config = ResolvedConfig::resolve(&cli.overrides())?;
    let ctx = ProviderContext::from_config(&config, BUILTIN_IDS);
    let registry = builtin_registry(&ctx)?;
    if let Some(id) = &config.default_provider {
        if !registry.has(id) {
            return Err(agentbridge::BridgeError::UnknownProvider(id.clone()));
        }
        registry.set_default(id.clone());
    }
    let pretty = cli.pretty;

    match cli.command {
        Commands::Chat(args) => agentbridge::cli::chat::execute(&args, &registry).await,
        Commands::Status(args) => {
            agentbridge::cli::status::execute(&args, &registry, pretty).await
        }
        Commands::Resolve(args) => {
            agentbridge::cli::resolve::execute(&args, &registry, pretty).await
        }
        Commands::Mcp(args) => agentbridge::cli::mcp::execute(&args, &registry, pretty).await,
    }
}
