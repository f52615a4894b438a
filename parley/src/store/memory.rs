//! In-memory store for tests and DB-less development. Semantics mirror the
//! MySQL implementation where observable: newest-first reads, idempotent
//! agent-message upsert, NULL-only repair on agent seeding.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    AgentMessageRow, AgentRow, MessageStore, SessionMember, SessionSummary, StoreError,
    StoredMessage, UserProfile,
};

#[derive(Default)]
struct State {
    /// Insertion-ordered; create_time strings sort the same as insertion here.
    messages: Vec<StoredMessage>,
    users: HashMap<String, UserProfile>,
    agents: HashMap<String, AgentRow>,
    members: Vec<(String, String)>,
    sessions: HashMap<String, String>,
}

#[derive(Default)]
pub struct MemoryMessageStore {
    state: Mutex<State>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: seed one plain chat message.
    pub fn push_message(&self, msg: StoredMessage) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.messages.push(msg);
    }

    /// Test helper: seed a user profile.
    pub fn put_user(&self, user: UserProfile) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.users.insert(user.user_id.clone(), user);
    }

    /// Test helper: register a session name.
    pub fn put_session(&self, session_id: &str, name: &str) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.sessions.insert(session_id.to_string(), name.to_string());
    }

    /// Test helper: the persisted content for a message id, if any.
    pub fn message_content(&self, message_id: &str) -> Option<String> {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.messages
            .iter()
            .find(|m| m.message_id == message_id)
            .map(|m| m.content.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let s = self.lock();
        Ok(s.messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_agent_message(&self, row: &AgentMessageRow) -> Result<(), StoreError> {
        let mut s = self.lock();
        if let Some(existing) = s.messages.iter_mut().find(|m| m.message_id == row.message_id) {
            existing.content = row.content.clone();
            return Ok(());
        }
        let is_agent = s.agents.contains_key(&row.user_id)
            || s.users.get(&row.user_id).is_some_and(|u| u.is_agent);
        let nickname = s
            .agents
            .get(&row.user_id)
            .map(|a| a.nickname.clone())
            .or_else(|| s.users.get(&row.user_id).and_then(|u| u.nickname.clone()));
        s.messages.push(StoredMessage {
            message_id: row.message_id.clone(),
            session_id: row.session_id.clone(),
            user_id: row.user_id.clone(),
            nickname,
            message_type: 0,
            content: row.content.clone(),
            file_name: None,
            create_time: row.create_time.clone(),
            is_agent,
        });
        Ok(())
    }

    async fn session_members(&self, session_id: &str) -> Result<Vec<SessionMember>, StoreError> {
        let s = self.lock();
        Ok(s.members
            .iter()
            .filter(|(sid, _)| sid == session_id)
            .map(|(_, uid)| SessionMember {
                user_id: uid.clone(),
                nickname: s.users.get(uid).and_then(|u| u.nickname.clone()),
                is_agent: s.agents.contains_key(uid)
                    || s.users.get(uid).is_some_and(|u| u.is_agent),
            })
            .collect())
    }

    async fn user_info(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.lock().users.get(user_id).cloned())
    }

    async fn search_messages(
        &self,
        session_id: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let s = self.lock();
        Ok(s.messages
            .iter()
            .filter(|m| m.session_id == session_id && m.content.contains(keyword))
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn user_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError> {
        let s = self.lock();
        Ok(s.members
            .iter()
            .filter(|(_, uid)| uid == user_id)
            .map(|(sid, _)| SessionSummary {
                session_id: sid.clone(),
                session_name: s.sessions.get(sid).cloned(),
            })
            .collect())
    }

    async fn agent_rows(&self) -> Result<Vec<AgentRow>, StoreError> {
        let mut rows: Vec<AgentRow> = self.lock().agents.values().cloned().collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(rows)
    }

    async fn agent_row(&self, user_id: &str) -> Result<Option<AgentRow>, StoreError> {
        Ok(self.lock().agents.get(user_id).cloned())
    }

    async fn upsert_agent_row(&self, agent: &AgentRow) -> Result<(), StoreError> {
        let mut s = self.lock();
        // Existing rows keep their values; only absent ones are filled.
        s.agents
            .entry(agent.user_id.clone())
            .or_insert_with(|| agent.clone());
        Ok(())
    }

    async fn add_session_member(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let mut s = self.lock();
        let pair = (session_id.to_string(), user_id.to_string());
        if s.members.contains(&pair) {
            return Ok(false);
        }
        s.members.push(pair);
        Ok(true)
    }
}
