//! Session stream protocol: the wire shape of everything published on a
//! chat-session topic.
//!
//! - [`SessionEvent`]: one event (kind + payload) as a tagged serde enum.
//! - [`Envelope`]: per-topic stamps (event id, timestamp) merged into the payload.
//! - [`encode_sse`]: SSE framing (`event:` line, `data:` line, blank terminator).
//!
//! The bus in the core crate owns ordering and fanout; this crate only defines
//! the bytes. Consumers resume with the numeric `id` field each payload carries.

mod envelope;
mod event;
mod sse;

pub use envelope::Envelope;
pub use event::{ApprovalInfo, PartType, SessionEvent};
pub use sse::{encode_sse, HEARTBEAT_FRAME};
