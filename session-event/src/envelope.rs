//! Envelope stamps applied to each published payload: monotonic event id
//! (per topic) and an RFC 3339 timestamp. Resume uses the id.

use serde_json::Value;

/// Stamps merged into a payload at publish time. Does not overwrite keys the
/// payload already carries.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Topic this event was published on (the chat session id).
    pub session_id: Option<String>,
    /// Per-topic sequence number; strictly increasing within a topic.
    pub event_id: Option<u64>,
    /// RFC 3339 publish time.
    pub timestamp: Option<String>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.timestamp = Some(ts.into());
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.session_id {
            obj.entry("session_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
        if let Some(ref ts) = self.timestamp {
            obj.entry("timestamp")
                .or_insert_with(|| Value::String(ts.clone()));
        }
    }
}
