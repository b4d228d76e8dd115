//! Chat command implementation.
//!
//! Streams canonical chunks to stdout, one JSON object per line. Ctrl-C
//! cancels the session; the stream still ends with its `finish` line.

use std::io::Write;

use crate::cli::args::ChatArgs;
use crate::core::chunk::Chunk;
use crate::core::provider::ChatOptions;
use crate::core::registry::ProviderRegistry;
use crate::error::{BridgeError, Result};

/// Execute the chat command.
///
/// # Errors
///
/// Returns error for an unknown provider, bad `--env` entries, a failed
/// stdout write, or a session that reported an in-band error.
pub async fn execute(args: &ChatArgs, registry: &ProviderRegistry) -> Result<()> {
    let provider = match &args.provider {
        Some(id) => registry.get(id)?,
        None => registry.get_default()?,
    };
    let options = build_options(args)?;
    let sub_chat_id = options.sub_chat_id.clone();
    tracing::debug!(provider = provider.id(), sub_chat_id = %sub_chat_id, "starting chat");

    let mut stream = provider.chat(options).await;
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut interrupted = false;
    let mut outcome = Outcome::default();
    let mut stdout = std::io::stdout();

    loop {
        let next = tokio::select! {
            chunk = stream.next_chunk() => chunk,
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                tracing::info!(sub_chat_id = %sub_chat_id, "interrupt received, cancelling");
                provider.cancel(&sub_chat_id);
                continue;
            }
        };
        let Some(chunk) = next else { break };
        writeln!(stdout, "{}", chunk.to_json_line()?)?;
        stdout.flush()?;
        outcome.observe(&chunk);
    }

    outcome.into_result(provider.id())
}

/// Session options from command-line arguments.
///
/// # Errors
///
/// Returns error for malformed `--env` entries or an unreadable working
/// directory.
pub fn build_options(args: &ChatArgs) -> Result<ChatOptions> {
    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let sub_chat_id = args
        .sub_chat_id
        .clone()
        .unwrap_or_else(|| format!("cli-{}", std::process::id()));

    let mut options =
        ChatOptions::new(sub_chat_id, args.prompt.clone(), cwd).with_mode(args.mode.into());
    if let Some(id) = &args.resume {
        options = options.with_resume(id.clone());
    }
    if let Some(model) = &args.model {
        options = options.with_model(model.clone());
    }
    if let Some(sandbox) = args.sandbox {
        options = options.with_sandbox(sandbox.into());
    }
    if let Some(approval) = args.approval {
        options = options.with_approval(approval.into());
    }
    if let Some(effort) = args.reasoning_effort {
        options = options.with_reasoning_effort(effort.into());
    }
    for (key, value) in args.env_pairs()? {
        options = options.with_env(key, value);
    }
    Ok(options)
}

/// The last in-band failure seen on a stream.
#[derive(Debug, Default)]
struct Outcome {
    failure: Option<(String, bool)>,
}

impl Outcome {
    fn observe(&mut self, chunk: &Chunk) {
        match chunk {
            Chunk::Error { error_text } => self.failure = Some((error_text.clone(), false)),
            Chunk::AuthError { error_text } => self.failure = Some((error_text.clone(), true)),
            _ => {}
        }
    }

    fn into_result(self, provider: &str) -> Result<()> {
        match self.failure {
            None => Ok(()),
            Some((message, auth)) => Err(BridgeError::SessionFailed {
                provider: provider.to_string(),
                message,
                auth,
            }),
        }
    }
}
