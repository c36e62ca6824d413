//! Provider trait — the abstraction over the chat-completion model API.
//!
//! A Provider sends the conversation history plus the available tool
//! schemas to the model and returns the model's single response turn with
//! its finish indicator. Consumed as a pure function from (history, tools)
//! to (assistant turn) — the driver never sees HTTP.

use crate::error::ProviderError;
use crate::message::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A tool schema handed to the model so it knows what it can call.
///
/// Tool identities are runtime data fetched from the tool host, not
/// compile-time types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The full conversation so far
    pub turns: Vec<Turn>,

    /// Tools the model may request; tool selection is automatic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

/// The model's signal for what it wants next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// The response turn carries tool calls to execute
    ToolCalls,
    /// The response turn carries the final answer
    Stop,
    /// Anything else (length, content_filter, ...) — non-terminal
    Other(String),
}

impl FinishReason {
    /// Parse the wire `finish_reason` string.
    pub fn parse(s: &str) -> Self {
        match s {
            "tool_calls" => Self::ToolCalls,
            "stop" => Self::Stop,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The model's single response turn plus its finish indicator.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// The generated assistant turn
    pub turn: Turn,

    /// Why the model stopped generating
    pub finish: FinishReason,
}

/// The core Provider trait.
///
/// The driver calls `complete()` without knowing which backend is being
/// used; tests substitute a scripted fake.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get the model's response turn.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_parsing() {
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(
            FinishReason::parse("length"),
            FinishReason::Other("length".into())
        );
    }

    #[test]
    fn tool_schema_serialization() {
        let schema = ToolSchema {
            name: "browser_navigate".into(),
            description: "Navigate to a URL".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" }
                },
                "required": ["url"]
            }),
        };
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("browser_navigate"));
        assert!(json.contains("url"));
    }
}
