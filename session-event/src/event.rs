//! Event kinds and payloads published on a chat-session topic.
//!
//! The `type` tag inside the payload matches the SSE `event:` line, so clients
//! that only look at `data:` still see the kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which transcript part a `content_delta` belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    Think,
    ToolCall,
    ToolArgs,
    ToolResult,
    Text,
}

impl PartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartType::Think => "think",
            PartType::ToolCall => "tool_call",
            PartType::ToolArgs => "tool_args",
            PartType::ToolResult => "tool_result",
            PartType::Text => "text",
        }
    }
}

/// Approval payload embedded in an `interruption` event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalInfo {
    pub id: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub reason: String,
    pub status: String,
}

/// One event on a session topic (kind + payload).
///
/// Envelope fields (`id`, `timestamp`) are injected separately by
/// [`Envelope`](crate::Envelope) so the enum stays a pure payload type.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First frame of every subscription.
    Init { session_id: String },
    /// A run began; `message_id` is the id the final row will be persisted under.
    AgentStart {
        message_id: String,
        run_id: String,
        session_id: String,
        agent_user_id: String,
        agent_nickname: String,
    },
    /// One transcript delta; concatenating all deltas of a run reproduces
    /// the persisted content byte for byte.
    ContentDelta {
        message_id: String,
        delta: String,
        part_type: PartType,
    },
    /// Model-provided reasoning summary; streamed but never persisted.
    ReasoningSummary { content: String, delta: bool },
    /// Terminal success of a run; published strictly after the DB commit.
    AgentDone {
        message_id: String,
        run_id: String,
        session_id: String,
        agent_user_id: String,
        final_content: String,
    },
    /// Terminal failure of a run; nothing was persisted.
    AgentError { message_id: String, error: String },
    /// A tool call is suspended awaiting user approval.
    Interruption { approval: ApprovalInfo },
    /// An approval reached a terminal status.
    ApprovalResolved {
        approval_id: String,
        status: String,
        resolved_by: String,
    },
    /// A run was cancelled; nothing was persisted.
    Cancelled { run_id: String },
    /// Topic is closing; subscribers should stop after draining.
    Done { session_id: String },
    /// Topic-level fatal error.
    Error { error: String },
}

impl SessionEvent {
    /// The SSE `event:` name for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Init { .. } => "init",
            SessionEvent::AgentStart { .. } => "agent_start",
            SessionEvent::ContentDelta { .. } => "content_delta",
            SessionEvent::ReasoningSummary { .. } => "reasoning_summary",
            SessionEvent::AgentDone { .. } => "agent_done",
            SessionEvent::AgentError { .. } => "agent_error",
            SessionEvent::Interruption { .. } => "interruption",
            SessionEvent::ApprovalResolved { .. } => "approval_resolved",
            SessionEvent::Cancelled { .. } => "cancelled",
            SessionEvent::Done { .. } => "done",
            SessionEvent::Error { .. } => "error",
        }
    }

    /// Whether a subscription ends after delivering this event.
    ///
    /// `agent_done` is not terminal: a session topic outlives individual runs.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Done { .. } | SessionEvent::Error { .. } | SessionEvent::Cancelled { .. }
        )
    }

    /// Serializes this event to a JSON object (kind tag + payload; no envelope).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_type_tag() {
        let ev = SessionEvent::ContentDelta {
            message_id: "m1".into(),
            delta: "hi".into(),
            part_type: PartType::Text,
        };
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], ev.kind());
        assert_eq!(v["part_type"], "text");
        assert_eq!(v["delta"], "hi");
    }

    #[test]
    fn part_type_serializes_snake_case() {
        for (pt, s) in [
            (PartType::Think, "think"),
            (PartType::ToolCall, "tool_call"),
            (PartType::ToolArgs, "tool_args"),
            (PartType::ToolResult, "tool_result"),
            (PartType::Text, "text"),
        ] {
            assert_eq!(pt.as_str(), s);
            assert_eq!(serde_json::to_value(pt).unwrap(), s);
        }
    }

    #[test]
    fn terminality() {
        assert!(SessionEvent::Done { session_id: "s".into() }.is_terminal());
        assert!(SessionEvent::Cancelled { run_id: "r".into() }.is_terminal());
        assert!(SessionEvent::Error { error: "e".into() }.is_terminal());
        assert!(!SessionEvent::AgentDone {
            message_id: "m".into(),
            run_id: "r".into(),
            session_id: "s".into(),
            agent_user_id: "a".into(),
            final_content: String::new(),
        }
        .is_terminal());
        assert!(!SessionEvent::AgentError { message_id: "m".into(), error: "e".into() }
            .is_terminal());
    }
}
