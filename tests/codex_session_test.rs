//! End-to-end codex sessions against a fake `codex` script.

#![cfg(unix)]

mod common;

use std::time::Duration;

use agentbridge::core::chunk::Chunk;
use agentbridge::core::provider::{AuthMethod, Provider, SandboxMode};
use agentbridge::test_utils::{
    CODEX_SESSION_JSONL, FakeAgent, chunk_types, check_stream_order, wait_until,
};
use agentbridge::{assert_contains, assert_stream_ordered};
use common::{Sandbox, collect};

const KEY: &[(&str, &str)] = &[("OPENAI_API_KEY", "sk-test-123")];

#[tokio::test]
async fn full_turn_maps_to_canonical_stream() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex").stdout_lines(CODEX_SESSION_JSONL));
    let provider = sandbox.codex(KEY);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "what is here?")).await).await;

    assert_eq!(
        chunk_types(&chunks),
        vec![
            "start",
            "start-step",
            "session-init",
            "tool-input-start",
            "tool-input-available",
            "tool-output-available",
            "tool-input-start",
            "tool-input-available",
            "tool-output-available",
            "text-start",
            "text-delta",
            "text-end",
            "message-metadata",
            "finish-step",
            "finish",
        ]
    );
    assert_stream_ordered!(&chunks);

    let Chunk::ToolOutputAvailable { output, .. } = &chunks[8] else {
        panic!("expected command output");
    };
    assert_eq!(output["exitCode"], 0);
    assert_eq!(output["output"], "Cargo.toml\nsrc\n");

    let Chunk::MessageMetadata { message_metadata } = &chunks[12] else {
        panic!("expected metadata");
    };
    assert_eq!(message_metadata.session_id.as_deref(), Some("thread-abc"));
    assert_eq!(message_metadata.input_tokens, 120);
    assert_eq!(message_metadata.total_tokens, 150);
    assert_eq!(message_metadata.cached_input_tokens, 20);
}

#[tokio::test]
async fn session_deregisters_after_finish() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex").stdout_lines(CODEX_SESSION_JSONL));
    let provider = sandbox.codex(KEY);

    let stream = provider.chat(sandbox.options("tab-1", "hi")).await;
    assert!(provider.is_active("tab-1"));
    let chunks = collect(stream).await;
    assert_eq!(chunks.last(), Some(&Chunk::Finish));
    assert!(wait_until(Duration::from_secs(5), || !provider.is_active("tab-1")).await);
}

#[tokio::test]
async fn missing_binary_reports_error_then_finish() {
    let sandbox = Sandbox::new();
    let provider = sandbox.codex(KEY);

    assert!(!provider.is_available().await);
    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;

    assert_eq!(chunk_types(&chunks), vec!["error", "finish"]);
    let Chunk::Error { error_text } = &chunks[0] else {
        panic!("expected error");
    };
    assert_contains!(error_text.as_str(), "codex CLI not found");
    assert_contains!(error_text.as_str(), "npm install -g @openai/codex");
}

#[tokio::test]
async fn missing_credential_reports_auth_error() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex").stdout_lines(CODEX_SESSION_JSONL));
    let provider = sandbox.codex(&[]);

    let status = provider.auth_status().await;
    assert!(!status.authenticated);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;
    assert_eq!(chunk_types(&chunks), vec!["auth-error", "finish"]);
}

#[tokio::test]
async fn login_token_file_counts_as_credential() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex").stdout_lines(CODEX_SESSION_JSONL).record_env());
    std::fs::write(
        sandbox.home.join("auth.json"),
        r#"{"OPENAI_API_KEY":null,"tokens":{"access_token":"eyJhbGciOi.token"}}"#,
    )
    .unwrap();
    let provider = sandbox.codex(&[]);

    let status = provider.auth_status().await;
    assert!(status.authenticated);
    assert_eq!(status.method, Some(AuthMethod::Token));

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;
    assert_eq!(chunks.last(), Some(&Chunk::Finish));
    // Tokens stay in auth.json; only API keys travel through the environment.
    assert!(!sandbox.recorded("codex.env").contains("eyJhbGciOi.token"));
}

#[tokio::test]
async fn api_key_and_caller_env_reach_the_child() {
    let sandbox = Sandbox::new();
    sandbox.install(
        &FakeAgent::new("codex")
            .stdout_lines(CODEX_SESSION_JSONL)
            .record_env()
            .record_args(),
    );
    let provider = sandbox.codex(KEY);
    let options = sandbox
        .options("tab-1", "-rf looks like a flag")
        .with_model("gpt-test")
        .with_sandbox(SandboxMode::ReadOnly)
        .with_env("AGENT_EXTRA", "on");

    collect(provider.chat(options).await).await;

    let env = sandbox.recorded("codex.env");
    assert_contains!(env.as_str(), "OPENAI_API_KEY=sk-test-123");
    assert_contains!(env.as_str(), "AGENT_EXTRA=on");
    assert_contains!(env.as_str(), "PATH=/usr/bin:/bin");

    let args: Vec<String> = sandbox.recorded("codex.args").lines().map(String::from).collect();
    assert_eq!(&args[..2], &["exec", "--json"]);
    assert!(args.windows(2).any(|w| w == ["--model", "gpt-test"]));
    assert!(args.windows(2).any(|w| w == ["--sandbox", "read-only"]));
    let n = args.len();
    assert_eq!(&args[n - 2..], &["--", "-rf looks like a flag"]);
}

#[tokio::test]
async fn resumed_session_passes_thread_id() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex").stdout_lines(CODEX_SESSION_JSONL).record_args());
    let provider = sandbox.codex(KEY);
    let options = sandbox.options("tab-1", "continue").with_resume("thread-abc");

    collect(provider.chat(options).await).await;

    let args: Vec<String> = sandbox.recorded("codex.args").lines().map(String::from).collect();
    assert!(args.windows(2).any(|w| w == ["resume", "thread-abc"]));
    assert!(!args.contains(&"--sandbox".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("continue"));
}

#[tokio::test]
async fn json_split_across_reads_is_reassembled() {
    let sandbox = Sandbox::new();
    let first = r#"{"type":"thread.started","thread_id":"t-1"}"#;
    let message = r#"{"type":"item.completed","item":{"id":"m","type":"agent_message","text":"héllo wörld"}}"#;
    let (head, tail) = message.split_at(30);
    sandbox.install(
        &FakeAgent::new("codex")
            .stdout_raw(format!("{first}\n{head}"))
            .sleep(Duration::from_millis(200))
            .stdout_raw(format!("{tail}\nnot json at all\n"))
            .stdout_lines(r#"{"type":"turn.completed","usage":{"input_tokens":1,"output_tokens":1}}"#),
    );
    let provider = sandbox.codex(KEY);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;

    assert_stream_ordered!(&chunks);
    let text: String = chunks
        .iter()
        .filter_map(|c| match c {
            Chunk::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "héllo wörld");
    assert_eq!(chunks.last(), Some(&Chunk::Finish));
}

#[tokio::test]
async fn nonzero_exit_reports_stderr_tail() {
    let sandbox = Sandbox::new();
    sandbox.install(
        &FakeAgent::new("codex")
            .stdout_lines(r#"{"type":"thread.started","thread_id":"t-1"}"#)
            .stderr_line("thread 'main' panicked at src/exec.rs")
            .exit_code(2),
    );
    let provider = sandbox.codex(KEY);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;

    assert_eq!(
        chunk_types(&chunks),
        vec!["start", "start-step", "session-init", "error", "finish-step", "finish"]
    );
    let Chunk::Error { error_text } = &chunks[3] else {
        panic!("expected error");
    };
    assert_contains!(error_text.as_str(), "exited with code 2");
    assert_contains!(error_text.as_str(), "panicked");
}

#[tokio::test]
async fn auth_failure_on_stderr_is_classified() {
    let sandbox = Sandbox::new();
    sandbox.install(
        &FakeAgent::new("codex")
            .stderr_line("ERROR: unexpected status 401 Unauthorized")
            .exit_code(1),
    );
    let provider = sandbox.codex(KEY);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;

    assert_eq!(chunk_types(&chunks), vec!["auth-error", "finish"]);
}

#[tokio::test]
async fn turn_failure_ends_the_stream_once() {
    let sandbox = Sandbox::new();
    sandbox.install(
        &FakeAgent::new("codex")
            .stdout_lines(
                "{\"type\":\"thread.started\",\"thread_id\":\"t-1\"}\n\
                 {\"type\":\"turn.failed\",\"error\":{\"message\":\"model overloaded\"}}\n\
                 {\"type\":\"turn.completed\",\"usage\":{}}",
            )
            .exit_code(1),
    );
    let provider = sandbox.codex(KEY);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;

    assert!(check_stream_order(&chunks).is_ok());
    assert_eq!(
        chunk_types(&chunks),
        vec!["start", "start-step", "session-init", "error", "finish-step", "finish"]
    );
    assert_eq!(chunks[3], Chunk::error("model overloaded"));
}

#[tokio::test]
async fn clean_exit_without_turn_end_still_finishes() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex").stdout_lines(
        "{\"type\":\"thread.started\",\"thread_id\":\"t-1\"}\n\
         {\"type\":\"item.started\",\"item\":{\"id\":\"m\",\"type\":\"agent_message\",\"text\":\"partial\"}}",
    ));
    let provider = sandbox.codex(KEY);

    let chunks = collect(provider.chat(sandbox.options("tab-1", "hi")).await).await;

    assert_stream_ordered!(&chunks);
    assert_eq!(
        &chunk_types(&chunks)[3..],
        &["text-start", "text-delta", "text-end", "finish-step", "finish"]
    );
}

#[tokio::test]
async fn stderr_hook_sees_every_line() {
    use std::sync::{Arc, Mutex};

    let sandbox = Sandbox::new();
    sandbox.install(
        &FakeAgent::new("codex")
            .stderr_line("note: one")
            .stdout_lines(CODEX_SESSION_JSONL)
            .stderr_line("note: two"),
    );
    let provider = sandbox.codex(KEY);
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&seen);
    let options = sandbox
        .options("tab-1", "hi")
        .with_stderr_hook(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }));

    let chunks = collect(provider.chat(options).await).await;

    assert_eq!(chunks.last(), Some(&Chunk::Finish));
    assert!(
        wait_until(Duration::from_secs(2), || seen.lock().unwrap().len() == 2).await,
        "stderr lines: {:?}",
        seen.lock().unwrap()
    );
}
