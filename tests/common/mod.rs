//! Shared helpers for integration tests.
//!
//! Every session test runs a fake agent script from a private bin
//! directory through an isolated provider context, so no real agent CLI,
//! login shell or keychain is involved.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentbridge::core::chunk::Chunk;
use agentbridge::core::provider::{ChatOptions, ChatStream, ProviderContext};
use agentbridge::core::session::SessionRegistry;
use agentbridge::providers::{ClaudeProvider, CodexProvider};
use agentbridge::test_utils::{FakeAgent, TestDir, isolated_context};

/// Upper bound for any single stream to finish in tests.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// A private bin directory, a scratch home and a session registry shared
/// by every provider the sandbox builds.
pub struct Sandbox {
    pub dir: TestDir,
    pub bin: PathBuf,
    pub home: PathBuf,
    pub sessions: Arc<SessionRegistry>,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = TestDir::new();
        let bin = dir.create_dir("bin");
        let home = dir.create_dir("home");
        Self {
            dir,
            bin,
            home,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }

    pub fn install(&self, agent: &FakeAgent) -> PathBuf {
        agent.install(&self.bin)
    }

    pub fn context(&self, credential_env: &[(&str, &str)]) -> ProviderContext {
        isolated_context(&self.bin, credential_env).with_sessions(Arc::clone(&self.sessions))
    }

    pub fn codex(&self, credential_env: &[(&str, &str)]) -> CodexProvider {
        CodexProvider::with_home(self.context(credential_env), Some(self.home.clone()))
    }

    pub fn claude(&self, credential_env: &[(&str, &str)]) -> ClaudeProvider {
        ClaudeProvider::with_paths(self.context(credential_env), Some(self.home.clone()), None)
    }

    pub fn options(&self, sub_chat_id: &str, prompt: &str) -> ChatOptions {
        ChatOptions::new(sub_chat_id, prompt, self.dir.path())
    }

    /// Contents of a file the fake agent recorded, e.g. `codex.args`.
    pub fn recorded(&self, name: &str) -> String {
        std::fs::read_to_string(self.bin.join(name)).unwrap_or_default()
    }
}

/// Drain a stream, failing the test if it does not end in time.
pub async fn collect(stream: ChatStream) -> Vec<Chunk> {
    tokio::time::timeout(STREAM_TIMEOUT, stream.collect_all())
        .await
        .expect("stream did not end in time")
}

/// Read chunks until one of type `kind` arrives; returns everything read.
pub async fn read_until(stream: &mut ChatStream, kind: &str) -> Vec<Chunk> {
    let mut seen = Vec::new();
    tokio::time::timeout(STREAM_TIMEOUT, async {
        while let Some(chunk) = stream.next_chunk().await {
            let hit = chunk.type_name() == kind;
            seen.push(chunk);
            if hit {
                return;
            }
        }
        panic!("stream ended before a {kind} chunk");
    })
    .await
    .expect("timed out waiting for chunk");
    seen
}

pub fn finish_count(chunks: &[Chunk]) -> usize {
    chunks.iter().filter(|c| c.is_finish()).count()
}
