//! Codex events to canonical chunks.

use std::time::Instant;

use serde_json::{Value, json};

use super::events::{CodexEvent, ItemDetails, ThreadItem, TodoItem};
use crate::core::chunk::{Chunk, Usage};
use crate::core::transform::{StreamState, Transformer};

/// Markers of an authentication failure in codex errors and stderr.
pub const AUTH_SIGNATURES: &[&str] = &[
    "401 Unauthorized",
    "status 401",
    "Unauthorized",
    "invalid_api_key",
    "Incorrect API key",
    "Not logged in",
    "token_expired",
    "Please log in",
];

/// Per-session codex transformer.
#[derive(Debug)]
pub struct CodexTransformer {
    state: StreamState,
}

impl Default for CodexTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodexTransformer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::new(AUTH_SIGNATURES),
        }
    }

    fn item_started(&mut self, item: ThreadItem, out: &mut Vec<Chunk>) {
        let s = &mut self.state;
        match item.details {
            ItemDetails::AgentMessage { text } => {
                s.open_text(&item.id, out);
                s.snapshot_text(&item.id, &text, out);
            }
            ItemDetails::Reasoning { .. } => s.tool_start(&item.id, "Thinking", out),
            ItemDetails::CommandExecution { command, .. } => {
                s.tool_input(&item.id, "Bash", json!({ "command": command }), out);
            }
            ItemDetails::McpToolCall {
                server,
                tool,
                arguments,
                ..
            } => s.tool_input(&item.id, &mcp_tool_name(&server, &tool), arguments, out),
            ItemDetails::WebSearch { query } => {
                s.tool_input(&item.id, "WebSearch", json!({ "query": query }), out);
            }
            ItemDetails::TodoList { .. } => s.tool_start(&item.id, "TodoWrite", out),
            ItemDetails::FileChange { .. } | ItemDetails::Error { .. } | ItemDetails::Unknown => {}
        }
    }

    fn item_updated(&mut self, item: ThreadItem, out: &mut Vec<Chunk>) {
        // Updates resend the full text; only message text streams.
        if let ItemDetails::AgentMessage { text } = item.details {
            self.state.snapshot_text(&item.id, &text, out);
        }
    }

    fn item_completed(&mut self, item: ThreadItem, out: &mut Vec<Chunk>) {
        let s = &mut self.state;
        let id = item.id;
        match item.details {
            ItemDetails::AgentMessage { text } => s.complete_text(&id, &text, out),
            ItemDetails::Reasoning { text } => {
                s.finalize_tool(&id, "Thinking", json!({ "text": text }), json!({ "text": text }), out);
            }
            ItemDetails::CommandExecution {
                command,
                aggregated_output,
                exit_code,
                status,
            } => s.finalize_tool(
                &id,
                "Bash",
                json!({ "command": command }),
                json!({
                    "output": aggregated_output,
                    "exitCode": exit_code,
                    "status": status.as_str(),
                }),
                out,
            ),
            ItemDetails::FileChange { changes, status } => {
                for change in changes {
                    // Keyed by parent and path so two items never collide.
                    let call_id = format!("{id}-{}", change.path);
                    s.finalize_tool(
                        &call_id,
                        change.kind.tool_name(),
                        json!({ "file_path": change.path, "kind": change.kind.as_str() }),
                        json!({ "status": status.as_str() }),
                        out,
                    );
                }
            }
            ItemDetails::McpToolCall {
                server,
                tool,
                arguments,
                result,
                error,
                status,
            } => {
                let output = match error {
                    Some(err) => json!({ "error": err.message, "status": status.as_str() }),
                    None => json!({ "result": result.unwrap_or(Value::Null), "status": status.as_str() }),
                };
                s.finalize_tool(&id, &mcp_tool_name(&server, &tool), arguments, output, out);
            }
            ItemDetails::WebSearch { query } => s.finalize_tool(
                &id,
                "WebSearch",
                json!({ "query": query }),
                json!({ "status": "completed" }),
                out,
            ),
            ItemDetails::TodoList { items } => s.finalize_tool(
                &id,
                "TodoWrite",
                json!({ "todos": todos(&items) }),
                json!({ "status": "completed" }),
                out,
            ),
            // Non-fatal item errors; turn.failed carries fatal ones.
            ItemDetails::Error { .. } | ItemDetails::Unknown => {}
        }
    }
}

fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("mcp__{server}__{tool}")
}

fn todos(items: &[TodoItem]) -> Value {
    items
        .iter()
        .map(|item| {
            json!({
                "content": item.text,
                "status": if item.completed { "completed" } else { "pending" },
            })
        })
        .collect()
}

impl Transformer for CodexTransformer {
    type Event = CodexEvent;

    fn step(&mut self, event: CodexEvent, now: Instant) -> Vec<Chunk> {
        let mut out = Vec::new();
        if self.state.is_finished() {
            return out;
        }
        self.state.begin(now, &mut out);

        match event {
            CodexEvent::ThreadStarted { thread_id } => {
                self.state.set_session_id(thread_id.clone());
                out.push(Chunk::SessionInit {
                    session_id: Some(thread_id),
                    model: None,
                    tools: Vec::new(),
                    mcp_servers: Vec::new(),
                });
            }
            CodexEvent::ItemStarted { item } => self.item_started(item, &mut out),
            CodexEvent::ItemUpdated { item } => self.item_updated(item, &mut out),
            CodexEvent::ItemCompleted { item } => self.item_completed(item, &mut out),
            CodexEvent::TurnCompleted { usage } => {
                self.state.complete_turn(Usage::from(&usage), now, &mut out);
            }
            CodexEvent::TurnFailed { error } => self.state.fail(&error.message, &mut out),
            CodexEvent::Error { message } => self.state.fail(&message, &mut out),
            CodexEvent::TurnStarted | CodexEvent::Unknown => {}
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
