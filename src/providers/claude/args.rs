//! `claude -p` argument rules.
//!
//! Claude accepts the same flags on fresh and resumed sessions; the
//! permission mode stands in for sandbox and approval settings.

use crate::core::provider::{ApprovalPolicy, ChatMode, ChatOptions, SandboxMode};
use crate::providers::flags::{FlagRule, Support, assemble, push_prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    Resume,
    Model,
    PermissionMode,
}

const RULES: &[FlagRule<Flag>] = &[
    FlagRule::new(Flag::Resume, Support::BOTH),
    FlagRule::new(Flag::Model, Support::BOTH),
    FlagRule::new(Flag::PermissionMode, Support::BOTH),
];

/// Permission mode for the session.
#[must_use]
pub fn permission_mode(options: &ChatOptions) -> &'static str {
    match options.mode {
        ChatMode::Plan => "plan",
        ChatMode::Agent
            if options.approval == Some(ApprovalPolicy::Never)
                && options.sandbox == Some(SandboxMode::DangerFullAccess) =>
        {
            "bypassPermissions"
        }
        ChatMode::Agent => "acceptEdits",
    }
}

fn render(flag: Flag, options: &ChatOptions) -> Vec<String> {
    match flag {
        Flag::Resume => options
            .resume_session_id
            .as_ref()
            .map(|id| vec!["--resume".to_string(), id.clone()])
            .unwrap_or_default(),
        Flag::Model => options
            .model
            .as_ref()
            .map(|m| vec!["--model".to_string(), m.clone()])
            .unwrap_or_default(),
        Flag::PermissionMode => vec![
            "--permission-mode".to_string(),
            permission_mode(options).to_string(),
        ],
    }
}

/// Argument list for one session; the prompt is always last.
#[must_use]
pub fn build_args(options: &ChatOptions) -> Vec<String> {
    let mut args = vec![
        "-p".to_string(),
        "--output-format".to_string(),
        "stream-json".to_string(),
        "--verbose".to_string(),
    ];
    args.extend(assemble(
        RULES,
        options.resume_session_id.is_some(),
        |flag| render(flag, options),
    ));
    push_prompt(&mut args, &options.prompt);
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ChatOptions {
        ChatOptions::new("sub", "explain main.rs", "/work")
    }

    #[test]
    fn fresh_session() {
        assert_eq!(
            build_args(&opts()),
            vec![
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--permission-mode",
                "acceptEdits",
                "explain main.rs",
            ]
        );
    }

    #[test]
    fn resume_with_model_in_plan_mode() {
        let args = build_args(
            &opts()
                .with_resume("s-9")
                .with_model("opus")
                .with_mode(ChatMode::Plan),
        );
        assert_eq!(
            &args[4..],
            &[
                "--resume",
                "s-9",
                "--model",
                "opus",
                "--permission-mode",
                "plan",
                "explain main.rs"
            ]
        );
    }

    #[test]
    fn bypass_needs_both_explicit_settings() {
        let never = opts().with_approval(ApprovalPolicy::Never);
        assert_eq!(permission_mode(&never), "acceptEdits");
        let both = never.with_sandbox(SandboxMode::DangerFullAccess);
        assert_eq!(permission_mode(&both), "bypassPermissions");
        assert_eq!(permission_mode(&both.with_mode(ChatMode::Plan)), "plan");
    }
}
