//! Claude stream-json events to canonical chunks.

use std::time::Instant;

use serde_json::json;

use super::events::{
    AssistantBlock, AssistantMessage, ClaudeEvent, UserBlock, UserContent, tool_result_text,
};
use crate::core::chunk::{Chunk, Usage};
use crate::core::transform::{StreamState, Transformer};

/// Markers of an authentication failure in claude results and stderr.
pub const AUTH_SIGNATURES: &[&str] = &[
    "Invalid API key",
    "Please run /login",
    "authentication_error",
    "OAuth token has expired",
    "API Error: 401",
    "401 Unauthorized",
];

/// Per-session claude transformer.
#[derive(Debug)]
pub struct ClaudeTransformer {
    state: StreamState,
    anonymous_messages: u64,
    /// Content blocks seen so far. One message's blocks arrive as separate
    /// events, each at index 0, so the position in `content` is not unique.
    blocks: u64,
}

impl Default for ClaudeTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeTransformer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::new(AUTH_SIGNATURES),
            anonymous_messages: 0,
            blocks: 0,
        }
    }

    fn assistant(&mut self, message: AssistantMessage, out: &mut Vec<Chunk>) {
        let message_id = message.id.unwrap_or_else(|| {
            self.anonymous_messages += 1;
            format!("msg-{}", self.anonymous_messages)
        });
        let s = &mut self.state;
        for block in message.content {
            self.blocks += 1;
            let block_id = format!("{message_id}-{}", self.blocks);
            match block {
                AssistantBlock::Text { text } => s.complete_text(&block_id, &text, out),
                AssistantBlock::Thinking { thinking } => s.finalize_tool(
                    &block_id,
                    "Thinking",
                    json!({ "text": thinking }),
                    json!({ "text": thinking }),
                    out,
                ),
                AssistantBlock::ToolUse { id, name, input } => s.tool_input(&id, &name, input, out),
                AssistantBlock::Unknown => {}
            }
        }
    }

    fn user(&mut self, content: UserContent, out: &mut Vec<Chunk>) {
        let UserContent::Blocks(blocks) = content else {
            return;
        };
        for block in blocks {
            if let UserBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } = block
            {
                self.state.tool_output(
                    &tool_use_id,
                    json!({ "output": tool_result_text(&content), "isError": is_error }),
                    out,
                );
            }
        }
    }
}

impl Transformer for ClaudeTransformer {
    type Event = ClaudeEvent;

    fn step(&mut self, event: ClaudeEvent, now: Instant) -> Vec<Chunk> {
        let mut out = Vec::new();
        if self.state.is_finished() {
            return out;
        }
        self.state.begin(now, &mut out);

        match event {
            ClaudeEvent::System {
                subtype,
                session_id,
                model,
                tools,
                mcp_servers,
            } if subtype == "init" => {
                if let Some(id) = &session_id {
                    self.state.set_session_id(id.clone());
                }
                out.push(Chunk::SessionInit {
                    session_id,
                    model,
                    tools,
                    mcp_servers,
                });
            }
            ClaudeEvent::Assistant {
                message,
                session_id,
            } => {
                if let Some(id) = session_id {
                    self.state.set_session_id(id);
                }
                self.assistant(message, &mut out);
            }
            ClaudeEvent::User { message } => self.user(message.content, &mut out),
            ClaudeEvent::Result {
                subtype,
                is_error,
                result,
                session_id,
                usage,
            } => {
                if let Some(id) = session_id {
                    self.state.set_session_id(id);
                }
                if is_error {
                    let message = result
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| format!("claude run failed: {subtype}"));
                    self.state.fail(&message, &mut out);
                } else {
                    self.state.complete_turn(Usage::from(&usage), now, &mut out);
                }
            }
            ClaudeEvent::System { .. } | ClaudeEvent::Unknown => {}
        }
        out
    }

    fn state(&self) -> &StreamState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }
}
