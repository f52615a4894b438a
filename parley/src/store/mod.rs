//! Chat domain database access behind a store seam.
//!
//! The gateway owns the schema (`user`, `message`, `chat_session`,
//! `chat_session_member`); this runtime reads history and membership and
//! writes exactly one thing: finished agent messages into `message`.
//! [`MySqlMessageStore`] is the production impl; [`MemoryMessageStore`]
//! backs tests and DB-less development.

mod memory;
mod mysql;

pub use memory::MemoryMessageStore;
pub use mysql::MySqlMessageStore;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// One row of `message` joined with its sender.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub message_id: String,
    pub session_id: String,
    pub user_id: String,
    pub nickname: Option<String>,
    pub message_type: i32,
    pub content: String,
    pub file_name: Option<String>,
    /// Rendered `YYYY-MM-DD HH:MM:SS`.
    pub create_time: String,
    pub is_agent: bool,
}

/// Finished agent message to persist. `message_type` is always text (0);
/// clients tell bots apart via the sender's `is_agent` flag.
#[derive(Clone, Debug)]
pub struct AgentMessageRow {
    pub message_id: String,
    pub session_id: String,
    pub user_id: String,
    pub content: String,
    pub create_time: String,
}

#[derive(Clone, Debug)]
pub struct SessionMember {
    pub user_id: String,
    pub nickname: Option<String>,
    pub is_agent: bool,
}

#[derive(Clone, Debug)]
pub struct UserProfile {
    pub user_id: String,
    pub nickname: Option<String>,
    pub description: Option<String>,
    pub is_agent: bool,
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub session_id: String,
    pub session_name: Option<String>,
}

/// A configured agent identity as stored in the `user` table.
#[derive(Clone, Debug)]
pub struct AgentRow {
    pub user_id: String,
    pub nickname: String,
    pub description: String,
    pub model: String,
    pub provider: String,
}

/// Chat domain reads plus the single agent-message write path.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Newest `limit` messages of a session, newest first.
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Upsert keyed on message id: writing the same id twice leaves the
    /// row's content equal to the most recent write.
    async fn insert_agent_message(&self, row: &AgentMessageRow) -> Result<(), StoreError>;

    async fn session_members(&self, session_id: &str) -> Result<Vec<SessionMember>, StoreError>;
    async fn user_info(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
    async fn search_messages(
        &self,
        session_id: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
    async fn user_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError>;

    /// All `is_agent = 1` rows.
    async fn agent_rows(&self) -> Result<Vec<AgentRow>, StoreError>;
    async fn agent_row(&self, user_id: &str) -> Result<Option<AgentRow>, StoreError>;
    /// Seeds or repairs one agent identity. Existing rows only get columns
    /// filled where they are NULL, so operator edits survive restarts.
    async fn upsert_agent_row(&self, agent: &AgentRow) -> Result<(), StoreError>;
    /// Returns false when the user was already a member.
    async fn add_session_member(&self, session_id: &str, user_id: &str)
        -> Result<bool, StoreError>;
}
