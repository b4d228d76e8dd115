//! The canonical message-chunk protocol.
//!
//! Every provider emits this exact shape, so a consumer renders all agents
//! through one code path. On the wire each chunk is a JSON object tagged by
//! `type` (kebab-case) with camelCase fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Usage and session details reported just before the terminal chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cached_input_tokens: u64,
    pub duration_ms: u64,
}

/// Token counts as reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
}

impl Usage {
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// One element of the canonical stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Chunk {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ToolInputStart {
        tool_call_id: String,
        tool_name: String,
    },
    ToolInputDelta {
        tool_call_id: String,
        input_text_delta: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: Value,
    },
    SessionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tools: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mcp_servers: Vec<Value>,
    },
    MessageMetadata {
        message_metadata: MessageMetadata,
    },
    FinishStep,
    Finish,
    Error {
        error_text: String,
    },
    AuthError {
        error_text: String,
    },
}

impl Chunk {
    /// The wire `type` tag.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StartStep => "start-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::ToolInputStart { .. } => "tool-input-start",
            Self::ToolInputDelta { .. } => "tool-input-delta",
            Self::ToolInputAvailable { .. } => "tool-input-available",
            Self::ToolOutputAvailable { .. } => "tool-output-available",
            Self::SessionInit { .. } => "session-init",
            Self::MessageMetadata { .. } => "message-metadata",
            Self::FinishStep => "finish-step",
            Self::Finish => "finish",
            Self::Error { .. } => "error",
            Self::AuthError { .. } => "auth-error",
        }
    }

    #[must_use]
    pub const fn is_finish(&self) -> bool {
        matches!(self, Self::Finish)
    }

    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::Error {
            error_text: text.into(),
        }
    }

    #[must_use]
    pub fn auth_error(text: impl Into<String>) -> Self {
        Self::AuthError {
            error_text: text.into(),
        }
    }

    /// One JSON line, no trailing newline.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_tagged_kebab_with_camel_fields() {
        let chunk = Chunk::ToolInputAvailable {
            tool_call_id: "item_1".into(),
            tool_name: "Bash".into(),
            input: json!({"command": "ls"}),
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "type": "tool-input-available",
                "toolCallId": "item_1",
                "toolName": "Bash",
                "input": {"command": "ls"}
            })
        );
    }

    #[test]
    fn unit_variants_carry_only_type() {
        assert_eq!(
            serde_json::to_value(Chunk::StartStep).unwrap(),
            json!({"type": "start-step"})
        );
        assert_eq!(
            serde_json::to_value(Chunk::Start { message_id: None }).unwrap(),
            json!({"type": "start"})
        );
    }

    #[test]
    fn metadata_nests_under_message_metadata() {
        let chunk = Chunk::MessageMetadata {
            message_metadata: MessageMetadata {
                session_id: Some("t-1".into()),
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15,
                cached_input_tokens: 2,
                duration_ms: 40,
            },
        };
        let v = serde_json::to_value(&chunk).unwrap();
        assert_eq!(v["type"], "message-metadata");
        assert_eq!(v["messageMetadata"]["sessionId"], "t-1");
        assert_eq!(v["messageMetadata"]["totalTokens"], 15);
        assert_eq!(v["messageMetadata"]["cachedInputTokens"], 2);
    }

    #[test]
    fn parses_back_from_json_line() {
        let line = r#"{"type":"auth-error","errorText":"401 Unauthorized"}"#;
        let chunk: Chunk = serde_json::from_str(line).unwrap();
        assert_eq!(chunk, Chunk::auth_error("401 Unauthorized"));
        assert_eq!(chunk.type_name(), "auth-error");
    }

    #[test]
    fn type_name_matches_serialized_tag() {
        let samples = [
            Chunk::Finish,
            Chunk::FinishStep,
            Chunk::error("x"),
            Chunk::TextDelta {
                id: "a".into(),
                delta: "b".into(),
            },
        ];
        for chunk in samples {
            let v = serde_json::to_value(&chunk).unwrap();
            assert_eq!(v["type"], chunk.type_name());
        }
    }
}
