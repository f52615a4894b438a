//! Configured agent identities: rows in the `user` table with `is_agent`
//! set, so the gateway routes membership and messages for bots exactly like
//! human users. A small predefined set is seeded at startup; operators can
//! add more rows directly and they are picked up on the next listing.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::store::{AgentRow, MessageStore, StoreError};

/// Identities seeded on startup. Existing rows are only repaired where
/// columns are NULL; operator edits win.
pub fn predefined_agents() -> Vec<AgentRow> {
    vec![
        AgentRow {
            user_id: "agent-o4-mini".into(),
            nickname: "Assistant (o4-mini)".into(),
            description: "Fast general-purpose assistant".into(),
            model: "o4-mini".into(),
            provider: "openai".into(),
        },
        AgentRow {
            user_id: "agent-gpt-5-mini".into(),
            nickname: "Assistant (GPT-5 mini)".into(),
            description: "Stronger reasoning and writing".into(),
            model: "openai/gpt-5-mini".into(),
            provider: "openrouter".into(),
        },
        AgentRow {
            user_id: "agent-deepseek-r1".into(),
            nickname: "Assistant (DeepSeek R1)".into(),
            description: "Reasoning-heavy assistant with visible thinking".into(),
            model: "deepseek/deepseek-r1-0528".into(),
            provider: "openrouter".into(),
        },
    ]
}

/// Read-through directory of agent identities.
pub struct AgentDirectory {
    store: Arc<dyn MessageStore>,
    cache: RwLock<HashMap<String, AgentRow>>,
}

impl AgentDirectory {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store, cache: RwLock::new(HashMap::new()) }
    }

    /// Seeds the predefined identities and primes the cache from the
    /// database. Called once at server startup.
    pub async fn ensure_agents(&self) -> Result<(), StoreError> {
        for agent in predefined_agents() {
            self.store.upsert_agent_row(&agent).await?;
        }
        let rows = self.store.agent_rows().await?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.clear();
        for row in rows {
            cache.insert(row.user_id.clone(), row);
        }
        tracing::info!(count = cache.len(), "agent identities ready");
        Ok(())
    }

    pub async fn get(&self, agent_user_id: &str) -> Result<Option<AgentRow>, StoreError> {
        if let Some(row) = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_user_id)
        {
            return Ok(Some(row.clone()));
        }
        let row = self.store.agent_row(agent_user_id).await?;
        if let Some(row) = &row {
            self.cache
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(row.user_id.clone(), row.clone());
        }
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<AgentRow>, StoreError> {
        let rows = self.store.agent_rows().await?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        for row in &rows {
            cache.insert(row.user_id.clone(), row.clone());
        }
        Ok(rows)
    }

    /// The identity used when a trigger does not name one. OpenRouter-backed
    /// agents are preferred.
    pub fn default_agent(&self) -> AgentRow {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        if let Some(row) = cache.values().find(|r| r.provider == "openrouter") {
            return row.clone();
        }
        if let Some(row) = cache.values().next() {
            return row.clone();
        }
        predefined_agents().remove(1)
    }

    /// Idempotent membership insert; returns false when already a member.
    pub async fn add_to_session(
        &self,
        session_id: &str,
        agent_user_id: &str,
    ) -> Result<bool, StoreError> {
        self.store.add_session_member(session_id, agent_user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMessageStore;

    #[tokio::test]
    async fn ensure_seeds_and_get_reads_through() {
        let store = Arc::new(MemoryMessageStore::new());
        let dir = AgentDirectory::new(store.clone());
        dir.ensure_agents().await.unwrap();

        let got = dir.get("agent-gpt-5-mini").await.unwrap().unwrap();
        assert_eq!(got.provider, "openrouter");
        assert!(dir.get("agent-nope").await.unwrap().is_none());
        assert_eq!(dir.list().await.unwrap().len(), predefined_agents().len());
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let store = Arc::new(MemoryMessageStore::new());
        let dir = AgentDirectory::new(store.clone());
        dir.ensure_agents().await.unwrap();
        dir.ensure_agents().await.unwrap();
        assert_eq!(dir.list().await.unwrap().len(), predefined_agents().len());
    }

    #[tokio::test]
    async fn default_agent_prefers_openrouter() {
        let store = Arc::new(MemoryMessageStore::new());
        let dir = AgentDirectory::new(store);
        dir.ensure_agents().await.unwrap();
        assert_eq!(dir.default_agent().provider, "openrouter");
    }

    #[tokio::test]
    async fn add_to_session_is_idempotent() {
        let store = Arc::new(MemoryMessageStore::new());
        let dir = AgentDirectory::new(store);
        assert!(dir.add_to_session("s1", "agent-x").await.unwrap());
        assert!(!dir.add_to_session("s1", "agent-x").await.unwrap());
    }
}
