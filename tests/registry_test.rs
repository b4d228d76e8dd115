//! Registry status probes over real (fake-binary) providers.

#![cfg(unix)]

mod common;

use std::sync::Arc;

use agentbridge::BridgeError;
use agentbridge::core::registry::ProviderRegistry;
use agentbridge::providers::builtin_registry;
use agentbridge::test_utils::FakeAgent;
use common::Sandbox;

#[tokio::test]
async fn status_reflects_binaries_and_credentials() {
    let sandbox = Sandbox::new();
    sandbox.install(&FakeAgent::new("codex"));
    let registry = ProviderRegistry::new();
    registry
        .register(Arc::new(sandbox.codex(&[("OPENAI_API_KEY", "sk-live")])))
        .unwrap();
    registry.register(Arc::new(sandbox.claude(&[]))).unwrap();
    registry.set_default("claude");

    let statuses = registry.get_all_status().await;

    assert_eq!(statuses.len(), 2);
    let codex = &statuses[0];
    assert_eq!(codex.id, "codex");
    assert!(codex.available);
    assert!(codex.auth.authenticated);
    assert_eq!(codex.auth.source.as_deref(), Some("env:OPENAI_API_KEY"));
    assert!(!codex.is_default);

    let claude = &statuses[1];
    assert!(!claude.available);
    assert!(!claude.auth.authenticated);
    assert!(claude.is_default);

    let json = serde_json::to_value(claude).unwrap();
    assert_eq!(json["displayName"], "Claude");
    assert!(json["checkedAt"].is_string());
}

#[tokio::test]
async fn single_status_and_unknown_ids() {
    let sandbox = Sandbox::new();
    let registry = builtin_registry(&sandbox.context(&[])).unwrap();

    let status = registry.get_status("codex").await.unwrap();
    assert_eq!(status.display_name, "Codex");
    assert!(matches!(
        registry.get_status("gemini").await,
        Err(BridgeError::UnknownProvider(id)) if id == "gemini"
    ));
}
