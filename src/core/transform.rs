//! Provider-agnostic half of the event transformers.
//!
//! A provider transformer decodes its own raw events and drives a
//! [`StreamState`], which owns every ordering rule of the canonical stream:
//! the envelope opens once, at most one text block is open, a closed block
//! id is never reused, a tool call is finalized once, and nothing follows
//! `finish`. Both halves are plain synchronous state machines: no timers,
//! no I/O. Time comes in as an argument.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::chunk::{Chunk, MessageMetadata, Usage};

/// A per-session translator from raw provider events to canonical chunks.
pub trait Transformer: Send + 'static {
    /// The provider's raw event union.
    type Event: DeserializeOwned + Send;

    /// Feed one raw event and return the chunks it produces, in order.
    fn step(&mut self, event: Self::Event, now: Instant) -> Vec<Chunk>;

    fn state(&self) -> &StreamState;

    fn state_mut(&mut self) -> &mut StreamState;

    /// Whether `finish` has been emitted.
    fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Terminate with a failure that did not come from the event stream.
    fn fail(&mut self, message: &str) -> Vec<Chunk> {
        let mut out = Vec::new();
        self.state_mut().fail(message, &mut out);
        out
    }

    /// Terminate after the stream ended without a terminal event.
    fn end_of_stream(&mut self) -> Vec<Chunk> {
        let mut out = Vec::new();
        self.state_mut().end(&mut out);
        out
    }

    /// Terminate after cancellation: a lone `finish`, no error.
    fn cancel(&mut self) -> Vec<Chunk> {
        let mut out = Vec::new();
        self.state_mut().cancel(&mut out);
        out
    }
}

/// True if `text` contains any of the case-sensitive `signatures`.
#[must_use]
pub fn matches_signature(text: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|sig| text.contains(sig))
}

// =============================================================================
// Stream state
// =============================================================================

/// Ordering state shared by all provider transformers.
#[derive(Debug)]
pub struct StreamState {
    auth_signatures: &'static [&'static str],
    started: bool,
    finished: bool,
    started_at: Option<Instant>,
    session_id: Option<String>,

    open_text: Option<OpenBlock>,
    used_text_ids: HashSet<String>,
    completed_items: HashSet<String>,
    item_content: HashMap<String, String>,
    emitted_len: HashMap<String, usize>,
    next_block: u64,

    started_tools: HashSet<String>,
    inputs_available: HashSet<String>,
    emitted_tool_ids: HashSet<String>,
}

#[derive(Debug)]
struct OpenBlock {
    item_id: String,
    block_id: String,
}

impl StreamState {
    /// Fresh state; `auth_signatures` classify failures as `auth-error`.
    #[must_use]
    pub fn new(auth_signatures: &'static [&'static str]) -> Self {
        Self {
            auth_signatures,
            started: false,
            finished: false,
            started_at: None,
            session_id: None,
            open_text: None,
            used_text_ids: HashSet::new(),
            completed_items: HashSet::new(),
            item_content: HashMap::new(),
            emitted_len: HashMap::new(),
            next_block: 0,
            started_tools: HashSet::new(),
            inputs_available: HashSet::new(),
            emitted_tool_ids: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }

    /// Session/thread id captured for resumption.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, id: impl Into<String>) {
        self.session_id = Some(id.into());
    }

    /// Whether `text` carries one of this provider's auth-failure markers.
    #[must_use]
    pub fn is_auth_failure(&self, text: &str) -> bool {
        matches_signature(text, self.auth_signatures)
    }

    /// Emit `start` + `start-step` on the first call only.
    pub fn begin(&mut self, now: Instant, out: &mut Vec<Chunk>) {
        if self.started || self.finished {
            return;
        }
        self.started = true;
        self.started_at = Some(now);
        out.push(Chunk::Start { message_id: None });
        out.push(Chunk::StartStep);
    }

    // -------------------------------------------------------------------------
    // Text blocks
    // -------------------------------------------------------------------------

    fn allocate_block_id(&mut self, item_id: &str) -> String {
        if self.used_text_ids.insert(item_id.to_string()) {
            return item_id.to_string();
        }
        loop {
            self.next_block += 1;
            let candidate = format!("{item_id}-{}", self.next_block);
            if self.used_text_ids.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn is_open_for(&self, item_id: &str) -> bool {
        self.open_text.as_ref().is_some_and(|b| b.item_id == item_id)
    }

    /// Emit whatever accumulated text of `item_id` the consumer has not seen.
    fn flush_pending(&mut self, item_id: &str, out: &mut Vec<Chunk>) {
        let Some(block) = &self.open_text else {
            return;
        };
        let content = self.item_content.get(item_id).map_or("", String::as_str);
        let sent = self.emitted_len.get(item_id).copied().unwrap_or(0);
        if content.len() > sent {
            if let Some(delta) = content.get(sent..) {
                out.push(Chunk::TextDelta {
                    id: block.block_id.clone(),
                    delta: delta.to_string(),
                });
                self.emitted_len.insert(item_id.to_string(), content.len());
            }
        }
    }

    /// Open a text block for `item_id`, closing any other open block first.
    pub fn open_text(&mut self, item_id: &str, out: &mut Vec<Chunk>) {
        if self.finished || self.is_open_for(item_id) || self.completed_items.contains(item_id) {
            return;
        }
        self.close_text(out);
        let block_id = self.allocate_block_id(item_id);
        out.push(Chunk::TextStart {
            id: block_id.clone(),
        });
        self.open_text = Some(OpenBlock {
            item_id: item_id.to_string(),
            block_id,
        });
        self.flush_pending(item_id, out);
    }

    /// Append an incremental delta to `item_id`. Emitted only while its block
    /// is open; otherwise accumulated.
    pub fn append_text(&mut self, item_id: &str, delta: &str, out: &mut Vec<Chunk>) {
        if self.finished || delta.is_empty() || self.completed_items.contains(item_id) {
            return;
        }
        self.item_content
            .entry(item_id.to_string())
            .or_default()
            .push_str(delta);
        if self.is_open_for(item_id) {
            self.flush_pending(item_id, out);
        }
    }

    /// Replace `item_id`'s text with a full snapshot. Providers that resend
    /// the whole text on update use this; only the new suffix is emitted.
    pub fn snapshot_text(&mut self, item_id: &str, text: &str, out: &mut Vec<Chunk>) {
        if self.finished || self.completed_items.contains(item_id) {
            return;
        }
        let sent = self.emitted_len.get(item_id).copied().unwrap_or(0);
        let current = self.item_content.entry(item_id.to_string()).or_default();
        // Keep what was already shown if the provider rewrote earlier text.
        let already = current.get(..sent).unwrap_or("").to_string();
        if text.starts_with(&already) {
            *current = text.to_string();
        }
        if self.is_open_for(item_id) {
            self.flush_pending(item_id, out);
        }
    }

    /// Complete `item_id` with its final text. An item never opened gets a
    /// synthesized `text-start`/`text-delta`/`text-end` triple.
    pub fn complete_text(&mut self, item_id: &str, text: &str, out: &mut Vec<Chunk>) {
        if self.finished || self.completed_items.contains(item_id) {
            return;
        }
        let seen = self.item_content.contains_key(item_id) || self.is_open_for(item_id);
        if !seen && text.is_empty() {
            self.completed_items.insert(item_id.to_string());
            return;
        }
        self.snapshot_text(item_id, text, out);
        self.open_text(item_id, out);
        self.close_text(out);
    }

    /// Close the open text block, if any.
    pub fn close_text(&mut self, out: &mut Vec<Chunk>) {
        if let Some(block) = self.open_text.take() {
            out.push(Chunk::TextEnd { id: block.block_id });
            self.completed_items.insert(block.item_id);
        }
    }

    // -------------------------------------------------------------------------
    // Tool calls
    // -------------------------------------------------------------------------

    /// Emit `tool-input-start` once per id.
    pub fn tool_start(&mut self, id: &str, name: &str, out: &mut Vec<Chunk>) {
        if self.finished || self.emitted_tool_ids.contains(id) {
            return;
        }
        if self.started_tools.insert(id.to_string()) {
            self.close_text(out);
            out.push(Chunk::ToolInputStart {
                tool_call_id: id.to_string(),
                tool_name: name.to_string(),
            });
        }
    }

    /// Stream a fragment of tool input; dropped unless the call has started.
    pub fn tool_input_delta(&mut self, id: &str, delta: &str, out: &mut Vec<Chunk>) {
        if self.finished
            || !self.started_tools.contains(id)
            || self.inputs_available.contains(id)
        {
            return;
        }
        out.push(Chunk::ToolInputDelta {
            tool_call_id: id.to_string(),
            input_text_delta: delta.to_string(),
        });
    }

    /// Emit the complete tool input once per id.
    pub fn tool_input(&mut self, id: &str, name: &str, input: Value, out: &mut Vec<Chunk>) {
        if self.finished || self.inputs_available.contains(id) {
            return;
        }
        self.tool_start(id, name, out);
        self.inputs_available.insert(id.to_string());
        out.push(Chunk::ToolInputAvailable {
            tool_call_id: id.to_string(),
            tool_name: name.to_string(),
            input,
        });
    }

    /// Emit the tool output once per id. Ignored for a call whose input was
    /// never made available.
    pub fn tool_output(&mut self, id: &str, output: Value, out: &mut Vec<Chunk>) {
        if self.finished || !self.inputs_available.contains(id) {
            return;
        }
        if !self.emitted_tool_ids.insert(id.to_string()) {
            return;
        }
        out.push(Chunk::ToolOutputAvailable {
            tool_call_id: id.to_string(),
            output,
        });
    }

    /// Input and output in one go, for providers that report a tool call
    /// atomically.
    pub fn finalize_tool(
        &mut self,
        id: &str,
        name: &str,
        input: Value,
        output: Value,
        out: &mut Vec<Chunk>,
    ) {
        if self.is_tool_finalized(id) {
            return;
        }
        self.tool_input(id, name, input, out);
        self.tool_output(id, output, out);
    }

    #[must_use]
    pub fn is_tool_finalized(&self, id: &str) -> bool {
        self.emitted_tool_ids.contains(id)
    }

    // -------------------------------------------------------------------------
    // Terminal paths
    // -------------------------------------------------------------------------

    /// Close text, report usage, then `finish-step` and `finish`.
    pub fn complete_turn(&mut self, usage: Usage, now: Instant, out: &mut Vec<Chunk>) {
        if self.finished {
            return;
        }
        self.close_text(out);
        let duration_ms = self
            .started_at
            .map_or(0, |t| {
                u64::try_from(now.saturating_duration_since(t).as_millis()).unwrap_or(u64::MAX)
            });
        out.push(Chunk::MessageMetadata {
            message_metadata: MessageMetadata {
                session_id: self.session_id.clone(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                total_tokens: usage.total_tokens(),
                cached_input_tokens: usage.cached_input_tokens,
                duration_ms,
            },
        });
        self.terminate(out);
    }

    /// Close text, classify `message` as `auth-error` or `error`, terminate.
    pub fn fail(&mut self, message: &str, out: &mut Vec<Chunk>) {
        if self.finished {
            return;
        }
        self.close_text(out);
        if self.is_auth_failure(message) {
            out.push(Chunk::auth_error(message));
        } else {
            out.push(Chunk::error(message));
        }
        self.terminate(out);
    }

    /// Orderly end without usage data.
    pub fn end(&mut self, out: &mut Vec<Chunk>) {
        if self.finished {
            return;
        }
        self.close_text(out);
        self.terminate(out);
    }

    /// Cancellation: `finish` only.
    pub fn cancel(&mut self, out: &mut Vec<Chunk>) {
        if self.finished {
            return;
        }
        self.open_text = None;
        self.finished = true;
        out.push(Chunk::Finish);
    }

    fn terminate(&mut self, out: &mut Vec<Chunk>) {
        if self.started {
            out.push(Chunk::FinishStep);
        }
        out.push(Chunk::Finish);
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SIGS: &[&str] = &["401", "Unauthorized"];

    fn types(chunks: &[Chunk]) -> Vec<&'static str> {
        chunks.iter().map(Chunk::type_name).collect()
    }

    #[test]
    fn envelope_opens_once() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        let now = Instant::now();
        s.begin(now, &mut out);
        s.begin(now, &mut out);
        assert_eq!(types(&out), vec!["start", "start-step"]);
    }

    #[test]
    fn opening_a_block_closes_the_previous_one() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.open_text("a", &mut out);
        s.append_text("a", "x", &mut out);
        s.open_text("b", &mut out);
        assert_eq!(
            out,
            vec![
                Chunk::TextStart { id: "a".into() },
                Chunk::TextDelta {
                    id: "a".into(),
                    delta: "x".into()
                },
                Chunk::TextEnd { id: "a".into() },
                Chunk::TextStart { id: "b".into() },
            ]
        );
    }

    #[test]
    fn delta_without_open_block_accumulates_silently() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.append_text("a", "Hel", &mut out);
        s.append_text("a", "lo", &mut out);
        assert!(out.is_empty());
        s.open_text("a", &mut out);
        assert_eq!(
            out,
            vec![
                Chunk::TextStart { id: "a".into() },
                Chunk::TextDelta {
                    id: "a".into(),
                    delta: "Hello".into()
                },
            ]
        );
    }

    #[test]
    fn completion_without_start_synthesizes_triple() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.complete_text("msg", "Hello", &mut out);
        assert_eq!(
            out,
            vec![
                Chunk::TextStart { id: "msg".into() },
                Chunk::TextDelta {
                    id: "msg".into(),
                    delta: "Hello".into()
                },
                Chunk::TextEnd { id: "msg".into() },
            ]
        );
        // A re-delivered completion is a no-op.
        let mut again = Vec::new();
        s.complete_text("msg", "Hello", &mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn snapshot_emits_only_new_suffix() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.open_text("m", &mut out);
        s.snapshot_text("m", "Hel", &mut out);
        s.snapshot_text("m", "Hello", &mut out);
        s.complete_text("m", "Hello!", &mut out);
        let deltas: Vec<_> = out
            .iter()
            .filter_map(|c| match c {
                Chunk::TextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hel", "lo", "!"]);
        assert_eq!(out.last(), Some(&Chunk::TextEnd { id: "m".into() }));
    }

    #[test]
    fn reused_item_id_gets_fresh_block_id() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.complete_text("x", "one", &mut out);
        // Another item that happens to want the same block id.
        s.open_text("y", &mut out);
        s.close_text(&mut out);
        s.used_text_ids.insert("z".into());
        s.open_text("z", &mut out);
        let starts: Vec<_> = out
            .iter()
            .filter_map(|c| match c {
                Chunk::TextStart { id } => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec!["x", "y", "z-1"]);
    }

    #[test]
    fn tool_is_finalized_once() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.finalize_tool("t1", "Bash", json!({"command": "ls"}), json!({"output": ""}), &mut out);
        s.finalize_tool("t1", "Bash", json!({"command": "ls"}), json!({"output": ""}), &mut out);
        assert_eq!(
            types(&out),
            vec!["tool-input-start", "tool-input-available", "tool-output-available"]
        );
    }

    #[test]
    fn tool_delta_requires_start_and_output_requires_input() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.tool_input_delta("t", "{", &mut out);
        s.tool_output("t", json!(null), &mut out);
        assert!(out.is_empty());

        s.tool_start("t", "Write", &mut out);
        s.tool_input_delta("t", "{", &mut out);
        assert_eq!(types(&out), vec!["tool-input-start", "tool-input-delta"]);
    }

    #[test]
    fn tool_start_closes_open_text() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.open_text("m", &mut out);
        s.tool_start("t", "Bash", &mut out);
        assert_eq!(types(&out), vec!["text-start", "text-end", "tool-input-start"]);
    }

    #[test]
    fn complete_turn_reports_usage_and_duration() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        let t0 = Instant::now();
        s.begin(t0, &mut out);
        s.set_session_id("thread-1");
        s.open_text("m", &mut out);
        out.clear();

        let usage = Usage {
            input_tokens: 100,
            output_tokens: 20,
            cached_input_tokens: 30,
        };
        s.complete_turn(usage, t0 + std::time::Duration::from_millis(250), &mut out);
        assert_eq!(
            types(&out),
            vec!["text-end", "message-metadata", "finish-step", "finish"]
        );
        let Chunk::MessageMetadata { message_metadata } = &out[1] else {
            panic!("expected metadata");
        };
        assert_eq!(message_metadata.total_tokens, 120);
        assert_eq!(message_metadata.duration_ms, 250);
        assert_eq!(message_metadata.session_id.as_deref(), Some("thread-1"));
    }

    #[test]
    fn failures_are_classified_case_sensitively() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.begin(Instant::now(), &mut out);
        out.clear();
        s.fail("HTTP 401 from upstream", &mut out);
        assert_eq!(types(&out), vec!["auth-error", "finish-step", "finish"]);

        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.fail("unauthorized-ish but lowercase", &mut out);
        assert_eq!(types(&out), vec!["error", "finish"]);
    }

    #[test]
    fn nothing_after_finish() {
        let mut s = StreamState::new(SIGS);
        let mut out = Vec::new();
        s.cancel(&mut out);
        s.cancel(&mut out);
        s.begin(Instant::now(), &mut out);
        s.complete_text("m", "late", &mut out);
        s.fail("late", &mut out);
        s.end(&mut out);
        assert_eq!(out, vec![Chunk::Finish]);
    }
}
