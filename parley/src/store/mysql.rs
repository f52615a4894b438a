//! MySQL implementation over the gateway's schema.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

use super::{
    AgentMessageRow, AgentRow, MessageStore, SessionMember, SessionSummary, StoreError,
    StoredMessage, UserProfile,
};

pub struct MySqlMessageStore {
    pool: MySqlPool,
}

fn render_time(t: Option<NaiveDateTime>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

fn message_from_row(row: &sqlx::mysql::MySqlRow) -> Result<StoredMessage, sqlx::Error> {
    Ok(StoredMessage {
        message_id: row.try_get("message_id")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        nickname: row.try_get("nickname")?,
        message_type: row.try_get::<i32, _>("message_type")?,
        content: row.try_get::<Option<String>, _>("content")?.unwrap_or_default(),
        file_name: row.try_get("file_name")?,
        create_time: render_time(row.try_get("create_time")?),
        is_agent: row.try_get::<i64, _>("is_agent")? != 0,
    })
}

const MESSAGE_SELECT: &str = "SELECT m.message_id, m.session_id, m.user_id, m.message_type, \
     m.content, m.file_name, m.create_time, u.nickname, \
     COALESCE(u.is_agent, 0) AS is_agent \
     FROM message m LEFT JOIN user u ON m.user_id = u.user_id";

impl MySqlMessageStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPool::connect(url).await?;
        tracing::info!("mysql pool connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for MySqlMessageStore {
    async fn recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let sql = format!("{MESSAGE_SELECT} WHERE m.session_id = ? ORDER BY m.create_time DESC LIMIT ?");
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| message_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn insert_agent_message(&self, row: &AgentMessageRow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO message (message_id, session_id, user_id, message_type, content, create_time) \
             VALUES (?, ?, ?, 0, ?, ?) \
             ON DUPLICATE KEY UPDATE content = VALUES(content)",
        )
        .bind(&row.message_id)
        .bind(&row.session_id)
        .bind(&row.user_id)
        .bind(&row.content)
        .bind(&row.create_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn session_members(&self, session_id: &str) -> Result<Vec<SessionMember>, StoreError> {
        let rows = sqlx::query(
            "SELECT u.user_id, u.nickname, COALESCE(u.is_agent, 0) AS is_agent \
             FROM chat_session_member csm JOIN user u ON csm.user_id = u.user_id \
             WHERE csm.chat_session_id = ?",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(SessionMember {
                    user_id: r.try_get("user_id")?,
                    nickname: r.try_get("nickname")?,
                    is_agent: r.try_get::<i64, _>("is_agent")? != 0,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn user_info(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, nickname, description, COALESCE(is_agent, 0) AS is_agent \
             FROM user WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(UserProfile {
                user_id: r.try_get("user_id")?,
                nickname: r.try_get("nickname")?,
                description: r.try_get("description")?,
                is_agent: r.try_get::<i64, _>("is_agent")? != 0,
            })
        })
        .transpose()
        .map_err(|e: sqlx::Error| StoreError::from(e))
    }

    async fn search_messages(
        &self,
        session_id: &str,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let sql = format!(
            "{MESSAGE_SELECT} WHERE m.session_id = ? AND m.content LIKE ? \
             ORDER BY m.create_time DESC LIMIT ?"
        );
        let pattern = format!("%{}%", keyword.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(&sql)
            .bind(session_id)
            .bind(pattern)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| message_from_row(r).map_err(StoreError::from))
            .collect()
    }

    async fn user_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT cs.chat_session_id AS session_id, cs.chat_session_name AS session_name \
             FROM chat_session_member csm \
             JOIN chat_session cs ON csm.chat_session_id = cs.chat_session_id \
             WHERE csm.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(SessionSummary {
                    session_id: r.try_get("session_id")?,
                    session_name: r.try_get("session_name")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn agent_rows(&self) -> Result<Vec<AgentRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, nickname, description, agent_model, agent_provider \
             FROM user WHERE is_agent = 1",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(AgentRow {
                    user_id: r.try_get("user_id")?,
                    nickname: r
                        .try_get::<Option<String>, _>("nickname")?
                        .unwrap_or_else(|| r.try_get("user_id").unwrap_or_default()),
                    description: r.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
                    model: r.try_get::<Option<String>, _>("agent_model")?.unwrap_or_default(),
                    provider: r
                        .try_get::<Option<String>, _>("agent_provider")?
                        .unwrap_or_else(|| "openrouter".to_string()),
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn agent_row(&self, user_id: &str) -> Result<Option<AgentRow>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, nickname, description, agent_model, agent_provider \
             FROM user WHERE user_id = ? AND is_agent = 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(AgentRow {
                user_id: r.try_get("user_id")?,
                nickname: r
                    .try_get::<Option<String>, _>("nickname")?
                    .unwrap_or_else(|| user_id.to_string()),
                description: r.try_get::<Option<String>, _>("description")?.unwrap_or_default(),
                model: r.try_get::<Option<String>, _>("agent_model")?.unwrap_or_default(),
                provider: r
                    .try_get::<Option<String>, _>("agent_provider")?
                    .unwrap_or_else(|| "openrouter".to_string()),
            })
        })
        .transpose()
        .map_err(|e: sqlx::Error| StoreError::from(e))
    }

    async fn upsert_agent_row(&self, agent: &AgentRow) -> Result<(), StoreError> {
        let existing = sqlx::query("SELECT user_id FROM user WHERE user_id = ?")
            .bind(&agent.user_id)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            sqlx::query(
                "UPDATE user SET is_agent = 1, \
                 agent_model = COALESCE(agent_model, ?), \
                 agent_provider = COALESCE(agent_provider, ?), \
                 nickname = COALESCE(nickname, ?), \
                 description = COALESCE(description, ?) \
                 WHERE user_id = ?",
            )
            .bind(&agent.model)
            .bind(&agent.provider)
            .bind(&agent.nickname)
            .bind(&agent.description)
            .bind(&agent.user_id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                "INSERT INTO user (user_id, nickname, description, is_agent, agent_model, agent_provider) \
                 VALUES (?, ?, ?, 1, ?, ?)",
            )
            .bind(&agent.user_id)
            .bind(&agent.nickname)
            .bind(&agent.description)
            .bind(&agent.model)
            .bind(&agent.provider)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn add_session_member(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let existing = sqlx::query(
            "SELECT 1 AS present FROM chat_session_member WHERE chat_session_id = ? AND user_id = ?",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        if existing.is_some() {
            return Ok(false);
        }
        sqlx::query("INSERT INTO chat_session_member (chat_session_id, user_id) VALUES (?, ?)")
            .bind(session_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(true)
    }
}
