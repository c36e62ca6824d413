//! Turn and History domain types.
//!
//! These are the core value objects that flow through one request:
//! the platform delivers an InboundMessage → the driver seeds a History
//! with a user Turn → the model appends assistant/tool Turns until it
//! produces a final answer.

use serde::{Deserialize, Serialize};

/// The kind of chat an inbound message arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    /// A direct 1:1 chat with the bot
    P2p,
    /// A group chat
    Group,
}

impl ChatType {
    /// Parse the platform's `chat_type` string. Anything that is not
    /// `"p2p"` is treated as a group chat.
    pub fn parse(s: &str) -> Self {
        if s == "p2p" { Self::P2p } else { Self::Group }
    }
}

/// An inbound chat message as delivered by the messaging platform.
///
/// Immutable once received. Persisted verbatim in the idempotency store,
/// keyed by `message_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-assigned unique identifier — the processing key
    pub message_id: String,

    /// Platform message type (`"text"`, `"image"`, ...)
    pub message_type: String,

    /// Opaque platform payload. For text messages this is itself a
    /// JSON-encoded object: `{"text": "..."}`.
    pub content: String,

    /// `"p2p"` or `"group"`, verbatim from the platform
    pub chat_type: String,

    /// The chat the message arrived in
    pub chat_id: String,
}

impl InboundMessage {
    /// Extract the user's text from a text message's content payload.
    ///
    /// Returns `None` for non-text message types and for content that
    /// does not parse as `{"text": "..."}`.
    pub fn text(&self) -> Option<String> {
        if self.message_type != "text" {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(&self.content).ok()?;
        value.get("text")?.as_str().map(String::from)
    }

    pub fn chat_type(&self) -> ChatType {
        ChatType::parse(&self.chat_type)
    }
}

/// The role of a turn in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// A tool execution result
    Tool,
}

/// A single turn in a conversation.
///
/// A user turn carries plain text. An assistant turn carries either final
/// text or a non-empty ordered list of requested tool calls (content is
/// empty when tool calls are present). A tool turn carries the result text
/// and the id of the tool call it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<TurnToolCall>,

    /// If this is a tool result, which tool call it answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant turn carrying a final answer.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant turn carrying an ordered batch of tool calls.
    pub fn assistant_tool_calls(tool_calls: Vec<TurnToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool-result turn answering `tool_call_id`.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A tool call embedded in an assistant turn. Produced only by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnToolCall {
    /// Unique id for this call within the turn
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string, verbatim from the model
    pub arguments: String,
}

/// The ordered, append-only sequence of turns for one request.
///
/// The history is the sole state carried across loop rounds. It never
/// shrinks and never reorders existing turns; it is created when handling
/// of one inbound message starts and discarded when the loop terminates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    pub fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Seed a history with the inbound user text.
    pub fn with_user(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(text)],
        }
    }

    /// Append a turn. The only mutation the history supports.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_extraction_from_text_message() {
        let msg = InboundMessage {
            message_id: "m1".into(),
            message_type: "text".into(),
            content: r#"{"text":"What is 2+2?"}"#.into(),
            chat_type: "p2p".into(),
            chat_id: "c1".into(),
        };
        assert_eq!(msg.text().as_deref(), Some("What is 2+2?"));
        assert_eq!(msg.chat_type(), ChatType::P2p);
    }

    #[test]
    fn non_text_message_yields_no_text() {
        let msg = InboundMessage {
            message_id: "m2".into(),
            message_type: "image".into(),
            content: r#"{"image_key":"img_v2"}"#.into(),
            chat_type: "group".into(),
            chat_id: "c1".into(),
        };
        assert!(msg.text().is_none());
        assert_eq!(msg.chat_type(), ChatType::Group);
    }

    #[test]
    fn malformed_content_yields_no_text() {
        let msg = InboundMessage {
            message_id: "m3".into(),
            message_type: "text".into(),
            content: "not json".into(),
            chat_type: "p2p".into(),
            chat_id: "c1".into(),
        };
        assert!(msg.text().is_none());
    }

    #[test]
    fn history_is_append_only() {
        let mut history = History::with_user("hello");
        history.push(Turn::assistant("hi there"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].role, Role::User);
        assert_eq!(history.turns()[1].role, Role::Assistant);
    }

    #[test]
    fn assistant_tool_call_turn_has_no_content() {
        let turn = Turn::assistant_tool_calls(vec![TurnToolCall {
            id: "call_1".into(),
            name: "browser_navigate".into(),
            arguments: r#"{"url":"https://example.com"}"#.into(),
        }]);
        assert!(turn.content.is_empty());
        assert_eq!(turn.tool_calls.len(), 1);
    }

    #[test]
    fn tool_result_back_references_call() {
        let turn = Turn::tool_result("call_1", "page loaded");
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn history_serializes_as_plain_array() {
        let mut history = History::with_user("hi");
        history.push(Turn::assistant("hello"));
        let json = serde_json::to_value(&history).unwrap();
        assert!(json.is_array());
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["role"], "user");
    }
}
