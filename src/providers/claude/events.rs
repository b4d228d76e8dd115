//! Raw events of `claude -p --output-format stream-json --verbose`.

use serde::Deserialize;
use serde_json::Value;

use crate::core::chunk::Usage;

/// One JSONL line of claude output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeEvent {
    System {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        tools: Vec<String>,
        #[serde(default)]
        mcp_servers: Vec<Value>,
    },
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: Option<String>,
    },
    User {
        message: UserMessage,
    },
    Result {
        #[serde(default)]
        subtype: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        usage: ClaudeUsage,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<AssistantBlock>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: UserContent,
}

/// A user turn is either plain text (the prompt echo) or content blocks.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Blocks(Vec<UserBlock>),
    Text(String),
}

impl Default for UserContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ClaudeUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl From<&ClaudeUsage> for Usage {
    fn from(u: &ClaudeUsage) -> Self {
        Self {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cached_input_tokens: u.cache_read_input_tokens,
        }
    }
}

/// Flatten tool-result content to text when it is text-shaped.
#[must_use]
pub fn tool_result_text(content: &Value) -> Value {
    match content {
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if texts.len() == blocks.len() && !texts.is_empty() {
                Value::String(texts.join("\n"))
            } else {
                content.clone()
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(line: &str) -> ClaudeEvent {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn parses_init_and_result() {
        let ClaudeEvent::System {
            subtype,
            session_id,
            tools,
            ..
        } = parse(
            r#"{"type":"system","subtype":"init","session_id":"s-1","model":"claude-x","tools":["Bash","Edit"],"mcp_servers":[{"name":"docs","status":"connected"}],"cwd":"/w"}"#,
        )
        else {
            panic!("expected system");
        };
        assert_eq!(subtype, "init");
        assert_eq!(session_id.as_deref(), Some("s-1"));
        assert_eq!(tools, vec!["Bash", "Edit"]);

        let ClaudeEvent::Result { is_error, usage, .. } = parse(
            r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":12,"result":"done","session_id":"s-1","usage":{"input_tokens":5,"output_tokens":3,"cache_read_input_tokens":2}}"#,
        ) else {
            panic!("expected result");
        };
        assert!(!is_error);
        assert_eq!(Usage::from(&usage).cached_input_tokens, 2);
    }

    #[test]
    fn user_content_may_be_plain_text() {
        let ClaudeEvent::User { message } =
            parse(r#"{"type":"user","message":{"role":"user","content":"hi"}}"#)
        else {
            panic!("expected user");
        };
        assert_eq!(message.content, UserContent::Text("hi".into()));
    }

    #[test]
    fn unknown_types_and_blocks_are_tolerated() {
        assert_eq!(
            parse(r#"{"type":"stream_event","event":{"type":"message_start"}}"#),
            ClaudeEvent::Unknown
        );
        let ClaudeEvent::Assistant { message, .. } = parse(
            r#"{"type":"assistant","message":{"id":"m","content":[{"type":"server_tool_use","id":"x"},{"type":"text","text":"ok"}]}}"#,
        ) else {
            panic!("expected assistant");
        };
        assert_eq!(message.content[0], AssistantBlock::Unknown);
    }

    #[test]
    fn tool_result_text_flattens_text_blocks() {
        assert_eq!(
            tool_result_text(&json!([{"type":"text","text":"a"},{"type":"text","text":"b"}])),
            json!("a\nb")
        );
        assert_eq!(tool_result_text(&json!("plain")), json!("plain"));
        let mixed = json!([{"type":"image","source":{}}]);
        assert_eq!(tool_result_text(&mixed), mixed);
    }
}
