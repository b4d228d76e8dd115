//! CLI argument parsing and command dispatch.

pub mod args;
pub mod chat;
pub mod mcp;
pub mod resolve;
pub mod status;

pub use args::{Cli, Commands};

use serde::Serialize;

use crate::error::Result;

/// Render `value` as JSON, pretty-printed on request.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}
