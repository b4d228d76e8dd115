//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::core::provider::{ApprovalPolicy, ChatMode, ReasoningEffort, SandboxMode};
use crate::error::{BridgeError, Result};
use crate::storage::config::CliOverrides;

/// Drive CLI coding agents behind one canonical chunk stream.
#[derive(Parser, Debug)]
#[command(name = "agentbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Log level
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Upper bound for shell and PATH probes, in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub probe_timeout: Option<u64>,

    /// Directory holding bundled agent binaries
    #[arg(long, value_name = "DIR", global = true)]
    pub bundled_bin_dir: Option<PathBuf>,
}

impl Cli {
    /// Config layer contributed by command-line flags.
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        let default_provider = match &self.command {
            Commands::Chat(args) => args.provider.clone(),
            _ => None,
        };
        CliOverrides {
            default_provider,
            probe_timeout_secs: self.probe_timeout,
            bundled_bin_dir: self.bundled_bin_dir.clone(),
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one prompt and print canonical chunks as JSONL
    Chat(ChatArgs),

    /// Show availability and auth status of providers
    Status(StatusArgs),

    /// Show where a provider's binary and credential were found
    Resolve(ResolveArgs),

    /// List MCP servers a provider declares for a project
    Mcp(McpArgs),
}

/// Arguments for the `chat` command.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Prompt text
    pub prompt: String,

    /// Provider to use (defaults to the configured default)
    #[arg(long, short = 'p', value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Working directory for the agent
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Session key; a live session with the same key is superseded
    #[arg(long, value_name = "ID")]
    pub sub_chat_id: Option<String>,

    /// Resume a prior provider session
    #[arg(long, value_name = "SESSION_ID")]
    pub resume: Option<String>,

    /// Operating mode
    #[arg(long, value_enum, default_value = "agent")]
    pub mode: ModeArg,

    /// Model override
    #[arg(long)]
    pub model: Option<String>,

    /// Sandbox level
    #[arg(long, value_enum)]
    pub sandbox: Option<SandboxArg>,

    /// Approval policy
    #[arg(long, value_enum)]
    pub approval: Option<ApprovalArg>,

    /// Reasoning effort
    #[arg(long, value_enum)]
    pub reasoning_effort: Option<EffortArg>,

    /// Extra child environment, KEY=VALUE (empty value removes KEY)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,
}

impl ChatArgs {
    /// Split `--env` entries.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` for an entry without `=` or with an empty key.
    pub fn env_pairs(&self) -> Result<Vec<(String, String)>> {
        self.env
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
                _ => Err(BridgeError::ConfigInvalid {
                    key: "--env".to_string(),
                    message: format!("expected KEY=VALUE, got '{entry}'"),
                }),
            })
            .collect()
    }
}

/// Arguments for the `status` command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Only this provider
    #[arg(long, short = 'p', value_name = "PROVIDER")]
    pub provider: Option<String>,
}

/// Arguments for the `resolve` command.
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Provider id
    pub provider: String,
}

/// Arguments for the `mcp` command.
#[derive(Parser, Debug)]
pub struct McpArgs {
    /// Provider id
    pub provider: String,

    /// Project directory (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub project: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Agent,
    Plan,
}

impl From<ModeArg> for ChatMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Agent => Self::Agent,
            ModeArg::Plan => Self::Plan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SandboxArg {
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl From<SandboxArg> for SandboxMode {
    fn from(arg: SandboxArg) -> Self {
        match arg {
            SandboxArg::ReadOnly => Self::ReadOnly,
            SandboxArg::WorkspaceWrite => Self::WorkspaceWrite,
            SandboxArg::DangerFullAccess => Self::DangerFullAccess,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApprovalArg {
    Untrusted,
    OnFailure,
    OnRequest,
    Never,
}

impl From<ApprovalArg> for ApprovalPolicy {
    fn from(arg: ApprovalArg) -> Self {
        match arg {
            ApprovalArg::Untrusted => Self::Untrusted,
            ApprovalArg::OnFailure => Self::OnFailure,
            ApprovalArg::OnRequest => Self::OnRequest,
            ApprovalArg::Never => Self::Never,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EffortArg {
    Minimal,
    Low,
    Medium,
    High,
}

impl From<EffortArg> for ReasoningEffort {
    fn from(arg: EffortArg) -> Self {
        match arg {
            EffortArg::Minimal => Self::Minimal,
            EffortArg::Low => Self::Low,
            EffortArg::Medium => Self::Medium,
            EffortArg::High => Self::High,
        }
    }
}
