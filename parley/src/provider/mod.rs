//! Model provider abstraction: one streaming assistant turn at a time.
//!
//! [`ModelClient`] is the seam the orchestrator drives. The production
//! implementation speaks the OpenAI-compatible streaming chat-completions
//! wire ([`ChatCompletionsClient`]); [`MockModel`] replays scripted turns
//! for tests. A turn's event stream is finite and consumed exactly once —
//! the replay surface for clients is the event bus and the database, never
//! the provider.

mod chat_completions;
mod mock;

pub use chat_completions::ChatCompletionsClient;
pub use mock::MockModel;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("undecodable provider chunk: {0}")]
    Decode(String),
    #[error("provider stream aborted before completion")]
    Aborted,
    #[error("no api key configured for provider {0}")]
    MissingKey(&'static str),
}

/// Why an assistant turn ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Other(String),
}

impl FinishReason {
    fn from_wire(s: &str) -> Self {
        match s {
            "stop" => FinishReason::Stop,
            "tool_calls" => FinishReason::ToolCalls,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

/// One event of a streaming assistant turn, in arrival order.
/// `TurnEnd` is always the final event of a successful stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ProviderEvent {
    ReasoningDelta(String),
    ReasoningSummaryDelta(String),
    TextDelta(String),
    ToolCallStart { index: u32, id: String, name: String },
    ToolCallArgsDelta { index: u32, delta: String },
    Usage { prompt_tokens: u32, completion_tokens: u32, total_tokens: u32 },
    TurnEnd { finish_reason: FinishReason },
}

/// A recorded tool call fed back to the provider on the next turn.
#[derive(Clone, Debug, Serialize)]
pub struct ToolCallRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One conversation message in provider wire shape.
#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: Some(content.into()), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            role: "assistant".into(),
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Request for one streaming turn. `tools` are pre-rendered provider tool
/// definitions (`{"type":"function","function":{...}}`).
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<Value>,
    /// `Some("none")` forces a plain-text turn (used at the round bound).
    pub tool_choice: Option<String>,
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// A streaming chat-completion provider.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_turn(&self, request: TurnRequest) -> Result<ProviderStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_wire_shapes() {
        let sys = serde_json::to_value(ChatMessage::system("be nice")).unwrap();
        assert_eq!(sys, serde_json::json!({"role": "system", "content": "be nice"}));

        let tool = serde_json::to_value(ChatMessage::tool("call_1", "result")).unwrap();
        assert_eq!(
            tool,
            serde_json::json!({"role": "tool", "content": "result", "tool_call_id": "call_1"})
        );

        let asst = serde_json::to_value(ChatMessage::assistant(
            None,
            vec![ToolCallRecord {
                id: "call_1".into(),
                kind: "function".into(),
                function: FunctionCall { name: "t".into(), arguments: "{}".into() },
            }],
        ))
        .unwrap();
        assert_eq!(asst["tool_calls"][0]["type"], "function");
        assert_eq!(asst["tool_calls"][0]["function"]["name"], "t");
        assert!(asst.get("content").is_none());
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from_wire("length"),
            FinishReason::Other("length".into())
        );
    }
}
