//! # Parley
//!
//! Agent-execution runtime for a multi-user chat platform. Given a user
//! message that mentions a bot participant, it drives a streaming language
//! model through interleaved reasoning, tool calls, tool results and final
//! reply text; broadcasts the production live to every subscriber of the
//! chat session over SSE; and persists the finished transcript as a single
//! chat message so late subscribers reconstruct the same view.
//!
//! ## Main modules
//!
//! - [`bus`]: per-session pub/sub with bounded replay ([`EventBus`]).
//! - [`registry`]: in-flight runs and cancellation ([`RunRegistry`]).
//! - [`cache`]: typed KV seam ([`Cache`], [`RedisCache`], [`MemoryCache`]).
//! - [`store`]: chat domain DB seam ([`MessageStore`]).
//! - [`context`]: cache-then-DB context window + summarisation ([`ContextStore`]).
//! - [`writer`]: cache + async-DB dual write ([`DualWriter`]).
//! - [`content`]: the growing transcript ([`ContentBuilder`], [`parse_transcript`]).
//! - [`tools`]: browser, sandbox and chat-domain tools ([`tools::Tool`]).
//! - [`approval`]: suspension of gated tool calls ([`ApprovalStore`]).
//! - [`provider`]: streaming model seam ([`provider::ModelClient`], [`provider::MockModel`]).
//! - [`orchestrator`]: the run driver ([`Orchestrator`]).
//! - [`agents`]: configured agent identities ([`AgentDirectory`]).
//! - [`services`]: init/shutdown container the server injects ([`Services`]).

pub mod agents;
pub mod approval;
pub mod bus;
pub mod cache;
pub mod content;
pub mod context;
pub mod orchestrator;
pub mod prompts;
pub mod provider;
pub mod registry;
pub mod services;
pub mod store;
pub mod tools;
pub mod writer;

pub use agents::AgentDirectory;
pub use approval::{ApprovalStatus, ApprovalStore, ResolveError};
pub use bus::{EventBus, Subscription};
pub use cache::{Cache, MemoryCache, RedisCache};
pub use content::{parse_transcript, ContentBuilder, Part};
pub use context::{ContextMessage, ContextStore};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use registry::{Run, RunRegistry};
pub use services::Services;
pub use store::{MessageStore, StoredMessage};
pub use writer::{AgentMessage, DualWriter};
