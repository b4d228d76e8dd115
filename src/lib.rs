//! agentbridge - drive CLI coding agents as interchangeable providers.
//!
//! Each provider spawns an agent CLI (`codex exec --json`,
//! `claude -p --output-format stream-json`), parses its JSON-lines output
//! and re-emits it as one canonical, strictly ordered chunk stream.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] for SIGTERM and test env helpers
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod providers;
pub mod storage;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{BridgeError, ExitCode, Result};
