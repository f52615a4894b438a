//! Chat-domain tools: history, membership, user lookup, message search,
//! session listing. All reads go through the context loader or the store
//! seam; nothing here writes.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{Tool, ToolContext, ToolError, ToolSpec};
use crate::context::{format_line, ContextStore};
use crate::store::MessageStore;

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

fn arg_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub struct GetChatHistoryTool {
    context: Arc<ContextStore>,
}

impl GetChatHistoryTool {
    pub fn new(context: Arc<ContextStore>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl Tool for GetChatHistoryTool {
    fn name(&self) -> &str {
        "get_chat_history"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_chat_history".into(),
            description: "Recent messages of a chat session, oldest first.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string", "description": "Session id; omit for the current session."},
                    "limit": {"type": "integer", "default": 20},
                    "offset": {"type": "integer", "description": "Messages to skip from the newest end.", "default": 0}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let session_id = ctx.resolve_session_id(arg_str(&args, "session_id"));
        let limit = arg_usize(&args, "limit", 20);
        let offset = arg_usize(&args, "offset", 0);

        let messages = self
            .context
            .get_context(&session_id, limit + offset)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let end = messages.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        let window = &messages[start..end];
        if window.is_empty() {
            return Ok(format!("No messages in session {session_id}"));
        }
        Ok(window
            .iter()
            .map(|m| format_line(m, false))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

pub struct GetSessionMembersTool {
    store: Arc<dyn MessageStore>,
}

impl GetSessionMembersTool {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetSessionMembersTool {
    fn name(&self) -> &str {
        "get_session_members"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_session_members".into(),
            description: "Members of a chat session.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string", "description": "Session id; omit for the current session."}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let session_id = ctx.resolve_session_id(arg_str(&args, "session_id"));
        let members = self
            .store
            .session_members(&session_id)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if members.is_empty() {
            return Ok(format!("No members in session {session_id}"));
        }
        Ok(members
            .iter()
            .map(|m| {
                let name = m.nickname.as_deref().unwrap_or(&m.user_id);
                if m.is_agent {
                    format!("{name} ({}) [bot]", m.user_id)
                } else {
                    format!("{name} ({})", m.user_id)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

pub struct GetUserInfoTool {
    store: Arc<dyn MessageStore>,
}

impl GetUserInfoTool {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetUserInfoTool {
    fn name(&self) -> &str {
        "get_user_info"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_user_info".into(),
            description: "Profile of a user.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string", "description": "User id; omit for the requesting user."}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let user_id = arg_str(&args, "user_id")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&ctx.user_id)
            .to_string();
        let profile = self
            .store
            .user_info(&user_id)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        match profile {
            None => Ok(format!("No such user: {user_id}")),
            Some(p) => {
                let mut out = format!(
                    "{} ({})",
                    p.nickname.as_deref().unwrap_or(&p.user_id),
                    p.user_id
                );
                if p.is_agent {
                    out.push_str(" [bot]");
                }
                if let Some(d) = p.description.filter(|d| !d.is_empty()) {
                    out.push_str(&format!("\n{d}"));
                }
                Ok(out)
            }
        }
    }
}

pub struct SearchMessagesTool {
    store: Arc<dyn MessageStore>,
}

impl SearchMessagesTool {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for SearchMessagesTool {
    fn name(&self) -> &str {
        "search_messages"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "search_messages".into(),
            description: "Search messages of a session by keyword.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "session_id": {"type": "string", "description": "Session id; omit for the current session."},
                    "keyword": {"type": "string"},
                    "limit": {"type": "integer", "default": 20}
                },
                "required": ["keyword"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let keyword = arg_str(&args, "keyword")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidInput("missing keyword".into()))?;
        let session_id = ctx.resolve_session_id(arg_str(&args, "session_id"));
        let limit = arg_usize(&args, "limit", 20);

        let hits = self
            .store
            .search_messages(&session_id, keyword, limit)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if hits.is_empty() {
            return Ok(format!("No messages matching `{keyword}`"));
        }
        Ok(hits
            .iter()
            .map(|m| {
                format!(
                    "[{}] {}: {}",
                    m.create_time,
                    m.nickname.as_deref().unwrap_or(&m.user_id),
                    m.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

pub struct GetUserSessionsTool {
    store: Arc<dyn MessageStore>,
}

impl GetUserSessionsTool {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetUserSessionsTool {
    fn name(&self) -> &str {
        "get_user_sessions"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_user_sessions".into(),
            description: "Chat sessions a user belongs to.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "user_id": {"type": "string", "description": "User id; omit for the requesting user."}
                }
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<String, ToolError> {
        let user_id = arg_str(&args, "user_id")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&ctx.user_id)
            .to_string();
        let sessions = self
            .store
            .user_sessions(&user_id)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if sessions.is_empty() {
            return Ok(format!("No sessions for user {user_id}"));
        }
        Ok(sessions
            .iter()
            .map(|s| match &s.session_name {
                Some(name) => format!("{} ({})", name, s.session_id),
                None => s.session_id.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::kind;
    use crate::store::{MemoryMessageStore, StoredMessage, UserProfile};
    use crate::tools::tests::test_context_with_store;

    fn seed_message(store: &MemoryMessageStore, id: &str, content: &str) {
        store.push_message(StoredMessage {
            message_id: id.into(),
            session_id: "s1".into(),
            user_id: "u1".into(),
            nickname: Some("Ann".into()),
            message_type: kind::TEXT,
            content: content.into(),
            file_name: None,
            create_time: "2026-01-01 08:00:00".into(),
            is_agent: false,
        });
    }

    #[tokio::test]
    async fn chat_history_formats_lines() {
        let (ctx, store) = test_context_with_store();
        seed_message(&store, "m1", "hello there");
        let tool = GetChatHistoryTool::new(ctx.context.clone());
        let out = tool.call(json!({}), &ctx).await.unwrap();
        assert_eq!(out, "[2026-01-01 08:00:00] Ann: hello there");
    }

    #[tokio::test]
    async fn chat_history_offset_skips_newest() {
        let (ctx, store) = test_context_with_store();
        for i in 0..4 {
            seed_message(&store, &format!("m{i}"), &format!("c{i}"));
        }
        let tool = GetChatHistoryTool::new(ctx.context.clone());
        let out = tool
            .call(json!({"limit": 2, "offset": 1}), &ctx)
            .await
            .unwrap();
        assert!(out.contains("c1"));
        assert!(out.contains("c2"));
        assert!(!out.contains("c3"));
    }

    #[tokio::test]
    async fn session_members_marks_bots() {
        let (ctx, store) = test_context_with_store();
        store.add_session_member("s1", "u1").await.unwrap();
        store.add_session_member("s1", "agent-x").await.unwrap();
        store.put_user(UserProfile {
            user_id: "u1".into(),
            nickname: Some("Ann".into()),
            description: None,
            is_agent: false,
        });
        store.put_user(UserProfile {
            user_id: "agent-x".into(),
            nickname: Some("Bot".into()),
            description: None,
            is_agent: true,
        });

        let tool = GetSessionMembersTool::new(ctx.store.clone());
        let out = tool.call(json!({}), &ctx).await.unwrap();
        assert!(out.contains("Ann (u1)"));
        assert!(out.contains("Bot (agent-x) [bot]"));
    }

    #[tokio::test]
    async fn search_requires_keyword() {
        let (ctx, _store) = test_context_with_store();
        let tool = SearchMessagesTool::new(ctx.store.clone());
        assert!(matches!(
            tool.call(json!({}), &ctx).await,
            Err(ToolError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn user_info_defaults_to_caller() {
        let (ctx, store) = test_context_with_store();
        store.put_user(UserProfile {
            user_id: "u1".into(),
            nickname: Some("Ann".into()),
            description: Some("likes cats".into()),
            is_agent: false,
        });
        let tool = GetUserInfoTool::new(ctx.store.clone());
        let out = tool.call(json!({}), &ctx).await.unwrap();
        assert!(out.contains("Ann (u1)"));
        assert!(out.contains("likes cats"));
    }

    #[tokio::test]
    async fn user_sessions_lists_names() {
        let (ctx, store) = test_context_with_store();
        store.add_session_member("s1", "u1").await.unwrap();
        store.put_session("s1", "cat lovers");
        let tool = GetUserSessionsTool::new(ctx.store.clone());
        let out = tool.call(json!({}), &ctx).await.unwrap();
        assert_eq!(out, "cat lovers (s1)");
    }
}
