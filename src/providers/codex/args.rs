//! `codex exec` argument rules.
//!
//! Layout: `exec --json <flags> [resume <id>] <prompt>`. Sandbox and
//! approval settings are fixed when a thread is created, so resumed
//! sessions never carry them.

use crate::core::provider::{ApprovalPolicy, ChatMode, ChatOptions, SandboxMode};
use crate::providers::flags::{FlagRule, Support, assemble, push_prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Model,
    Sandbox,
    Approval,
    Bypass,
    ReasoningEffort,
    SkipGitRepoCheck,
    WorkingDir,
}

const RULES: &[FlagRule<Flag>] = &[
    FlagRule::new(Flag::Model, Support::BOTH),
    FlagRule::new(Flag::Sandbox, Support::FRESH_ONLY),
    FlagRule::new(Flag::Approval, Support::FRESH_ONLY),
    FlagRule::new(Flag::Bypass, Support::FRESH_ONLY),
    FlagRule::new(Flag::ReasoningEffort, Support::BOTH),
    FlagRule::new(Flag::SkipGitRepoCheck, Support::BOTH),
    FlagRule::new(Flag::WorkingDir, Support::BOTH),
];

/// Sandbox level: explicit choice, else scoped by mode.
#[must_use]
pub fn effective_sandbox(options: &ChatOptions) -> SandboxMode {
    options.sandbox.unwrap_or(match options.mode {
        ChatMode::Agent => SandboxMode::WorkspaceWrite,
        ChatMode::Plan => SandboxMode::ReadOnly,
    })
}

/// Full access without approvals needs both settings asked for explicitly.
#[must_use]
pub fn bypass_requested(options: &ChatOptions) -> bool {
    options.approval == Some(ApprovalPolicy::Never)
        && options.sandbox == Some(SandboxMode::DangerFullAccess)
}

/// Inline `-c key="value"` override.
fn config_override(key: &str, value: &str) -> Vec<String> {
    vec!["-c".to_string(), format!("{key}=\"{value}\"")]
}

fn render(flag: Flag, options: &ChatOptions) -> Vec<String> {
    let bypass = bypass_requested(options);
    match flag {
        Flag::Model => options
            .model
            .as_ref()
            .map(|m| vec!["--model".to_string(), m.clone()])
            .unwrap_or_default(),
        Flag::Sandbox if !bypass => vec![
            "--sandbox".to_string(),
            effective_sandbox(options).as_str().to_string(),
        ],
        Flag::Approval if !bypass => options
            .approval
            .map(|a| config_override("approval_policy", a.as_str()))
            .unwrap_or_default(),
        Flag::Bypass if bypass => vec!["--dangerously-bypass-approvals-and-sandbox".to_string()],
        Flag::ReasoningEffort => options
            .reasoning_effort
            .map(|e| config_override("model_reasoning_effort", e.as_str()))
            .unwrap_or_default(),
        Flag::SkipGitRepoCheck => vec!["--skip-git-repo-check".to_string()],
        Flag::WorkingDir => vec!["-C".to_string(), options.cwd.display().to_string()],
        Flag::Sandbox | Flag::Approval | Flag::Bypass => Vec::new(),
    }
}

/// Argument list for one session; the prompt is always last.
#[must_use]
pub fn build_args(options: &ChatOptions) -> Vec<String> {
    let resume = options.resume_session_id.as_deref();
    let mut args = vec!["exec".to_string(), "--json".to_string()];
    args.extend(assemble(RULES, resume.is_some(), |flag| render(flag, options)));
    if let Some(id) = resume {
        args.push("resume".to_string());
        args.push(id.to_string());
    }
    push_prompt(&mut args, &options.prompt);
    args
}
