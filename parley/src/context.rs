//! Session context: cache-then-database read path for the last N messages
//! of a chat session, plus the summarisation applied before transcripts are
//! injected into a prompt.
//!
//! Cache layout is a list at `agent:context:{session_id}`, oldest first,
//! bounded to the window size. Every successful cache read refreshes the
//! TTL. Cache failures are logged and degrade to the database path; they
//! never fail a run.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;

use crate::cache::{keys, Cache};
use crate::store::{MessageStore, StoreError, StoredMessage};

/// Message-type codes shared with the gateway.
pub mod kind {
    pub const TEXT: i32 = 0;
    pub const IMAGE: i32 = 1;
    pub const FILE: i32 = 2;
    pub const VOICE: i32 = 3;
}

/// Per-message cap applied by [`summarize`].
pub const SUMMARY_MAX_CHARS: usize = 420;

/// One past chat message as exposed to the agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ContextMessage {
    pub message_id: String,
    pub user_id: String,
    pub nickname: String,
    pub message_type: i32,
    pub content: String,
    pub create_time: String,
    #[serde(default)]
    pub is_agent: bool,
}

impl ContextMessage {
    fn from_stored(m: StoredMessage) -> Self {
        // File messages carry their filename as content.
        let content = if m.message_type == kind::FILE {
            m.file_name.clone().unwrap_or(m.content)
        } else {
            m.content
        };
        ContextMessage {
            message_id: m.message_id,
            nickname: m.nickname.unwrap_or_else(|| m.user_id.clone()),
            user_id: m.user_id,
            message_type: m.message_type,
            content,
            create_time: m.create_time,
            is_agent: m.is_agent,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ContextStore {
    cache: Arc<dyn Cache>,
    store: Arc<dyn MessageStore>,
    window: usize,
    ttl: Duration,
}

impl ContextStore {
    pub fn new(
        cache: Arc<dyn Cache>,
        store: Arc<dyn MessageStore>,
        window: usize,
        ttl: Duration,
    ) -> Self {
        Self { cache, store, window, ttl }
    }

    /// Last `limit` messages of the session, oldest first. Cache hit
    /// refreshes the TTL; miss loads from the database and atomically
    /// replaces the cache list.
    pub async fn get_context(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ContextMessage>, ContextError> {
        let key = keys::context(session_id);

        match self.cache.lrange(&key, 0, limit as isize - 1).await {
            Ok(cached) if !cached.is_empty() => {
                let messages: Vec<ContextMessage> = cached
                    .iter()
                    .filter_map(|raw| serde_json::from_str(raw).ok())
                    .collect();
                if !messages.is_empty() {
                    tracing::debug!(session_id, count = messages.len(), "context cache hit");
                    if let Err(e) = self.cache.expire(&key, self.ttl).await {
                        tracing::warn!(session_id, error = %e, "context ttl refresh failed");
                    }
                    return Ok(messages);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(session_id, error = %e, "context cache read failed"),
        }

        tracing::debug!(session_id, "context cache miss, loading from database");
        let mut stored = self.store.recent_messages(session_id, limit).await?;
        stored.reverse();
        let messages: Vec<ContextMessage> =
            stored.into_iter().map(ContextMessage::from_stored).collect();

        if !messages.is_empty() {
            if let Err(e) = self.replace_cache(&key, &messages).await {
                tracing::warn!(session_id, error = %e, "context cache write failed");
            }
        }
        Ok(messages)
    }

    async fn replace_cache(
        &self,
        key: &str,
        messages: &[ContextMessage],
    ) -> Result<(), crate::cache::CacheError> {
        self.cache.delete(key).await?;
        let encoded: Vec<String> = messages
            .iter()
            .filter_map(|m| serde_json::to_string(m).ok())
            .collect();
        self.cache.rpush(key, &encoded, Some(self.ttl)).await?;
        Ok(())
    }

    /// Appends one message to the cached window and trims from the head
    /// beyond the window size. Cache-only; persistence belongs to the
    /// dual writer.
    pub async fn add_message(&self, session_id: &str, msg: &ContextMessage) {
        let key = keys::context(session_id);
        let Ok(encoded) = serde_json::to_string(msg) else {
            return;
        };
        let push = async {
            self.cache.rpush(&key, &[encoded], Some(self.ttl)).await?;
            let len = self.cache.llen(&key).await?;
            if len as usize > self.window {
                self.cache
                    .ltrim(&key, len as isize - self.window as isize, -1)
                    .await?;
            }
            Ok::<_, crate::cache::CacheError>(())
        };
        if let Err(e) = push.await {
            tracing::warn!(session_id, error = %e, "context cache append failed");
        }
    }

    pub async fn invalidate(&self, session_id: &str) {
        if let Err(e) = self.cache.delete(&keys::context(session_id)).await {
            tracing::warn!(session_id, error = %e, "context cache invalidation failed");
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

fn think_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<think(?:\s[^>]*)?>.*?</think>").unwrap())
}

fn tool_call_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<tool-call\s+name="([^"]*)"(?:\s+arguments='([^']*)')?\s*>.*?</tool-call>"#)
            .unwrap()
    })
}

fn tool_result_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<tool-result\s+name="([^"]*)"(?:\s+status="([^"]*)")?\s*>(.*?)</tool-result>"#)
            .unwrap()
    })
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => s[..i].to_string(),
        None => s.to_string(),
    }
}

/// Reduces one message for prompt injection: think regions elided, tool
/// calls to `name(args_preview)`, tool results to `name/status: preview`,
/// plain text kept; joined and capped at [`SUMMARY_MAX_CHARS`]. Protects
/// the model from seeing another run's reasoning verbatim.
pub fn summarize(msg: &ContextMessage) -> String {
    match msg.message_type {
        kind::IMAGE => return "[image]".to_string(),
        kind::VOICE => return "[voice]".to_string(),
        kind::FILE => return format!("[file: {}]", msg.content),
        _ => {}
    }
    let content = &msg.content;
    if content.is_empty() {
        return "[empty]".to_string();
    }

    let calls: Vec<String> = tool_call_re()
        .captures_iter(content)
        .map(|c| {
            let name = c.get(1).map_or("tool", |m| m.as_str());
            let args = c.get(2).map_or("", |m| m.as_str());
            format!("{}({})", name, cap(&collapse_ws(args), 40))
        })
        .collect();
    let results: Vec<String> = tool_result_re()
        .captures_iter(content)
        .map(|c| {
            let name = c.get(1).map_or("tool", |m| m.as_str());
            let status = c.get(2).map_or("success", |m| m.as_str());
            let text = collapse_ws(c.get(3).map_or("", |m| m.as_str()));
            if text.is_empty() {
                format!("{name}/{status}")
            } else {
                format!("{name}/{status}: {}", cap(&text, 100))
            }
        })
        .collect();

    let stripped = think_re().replace_all(content, " ");
    let stripped = tool_call_re().replace_all(&stripped, " ");
    let stripped = tool_result_re().replace_all(&stripped, " ");
    let plain = collapse_ws(&stripped);

    let mut parts = Vec::new();
    if !plain.is_empty() {
        parts.push(plain);
    }
    if !calls.is_empty() {
        parts.push(format!("tool calls: {}", calls.join(", ")));
    }
    if !results.is_empty() {
        parts.push(format!("tool results: {}", results.join(" | ")));
    }
    let joined = parts.join("; ");
    if joined.is_empty() {
        "[empty]".to_string()
    } else {
        cap(&joined, SUMMARY_MAX_CHARS)
    }
}

/// `[time] sender: text` line used by prompt splicing and the chat-history
/// tool. `summarized` applies [`summarize`] to the body.
pub fn format_line(msg: &ContextMessage, summarized: bool) -> String {
    let body = if summarized {
        summarize(msg)
    } else {
        match msg.message_type {
            kind::IMAGE => "[image]".to_string(),
            kind::VOICE => "[voice]".to_string(),
            kind::FILE => format!("[file: {}]", msg.content),
            _ => msg.content.clone(),
        }
    };
    format!("[{}] {}: {}", msg.create_time, msg.nickname, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::store::MemoryMessageStore;

    fn msg(content: &str, message_type: i32) -> ContextMessage {
        ContextMessage {
            message_id: "m1".into(),
            user_id: "u1".into(),
            nickname: "Ann".into(),
            message_type,
            content: content.into(),
            create_time: "2026-01-01 08:00:00".into(),
            is_agent: false,
        }
    }

    fn stored(id: &str, session: &str, content: &str) -> StoredMessage {
        StoredMessage {
            message_id: id.into(),
            session_id: session.into(),
            user_id: "u1".into(),
            nickname: Some("Ann".into()),
            message_type: kind::TEXT,
            content: content.into(),
            file_name: None,
            create_time: "2026-01-01 08:00:00".into(),
            is_agent: false,
        }
    }

    fn store_with(messages: Vec<StoredMessage>) -> Arc<MemoryMessageStore> {
        let store = Arc::new(MemoryMessageStore::new());
        for m in messages {
            store.push_message(m);
        }
        store
    }

    #[tokio::test]
    async fn db_load_reverses_to_oldest_first_and_fills_cache() {
        let cache = Arc::new(MemoryCache::new());
        let store = store_with(vec![
            stored("m1", "s1", "first"),
            stored("m2", "s1", "second"),
        ]);
        let ctx = ContextStore::new(cache.clone(), store, 30, Duration::from_secs(60));

        let msgs = ctx.get_context("s1", 10).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[1].content, "second");

        // Second read is served from the cache.
        let cached = cache.lrange(&keys::context("s1"), 0, -1).await.unwrap();
        assert_eq!(cached.len(), 2);
        let again = ctx.get_context("s1", 10).await.unwrap();
        assert_eq!(again, msgs);
    }

    #[tokio::test]
    async fn file_messages_take_filename_as_content() {
        let cache = Arc::new(MemoryCache::new());
        let mut m = stored("m1", "s1", "ignored");
        m.message_type = kind::FILE;
        m.file_name = Some("report.pdf".into());
        let ctx = ContextStore::new(cache, store_with(vec![m]), 30, Duration::from_secs(60));
        let msgs = ctx.get_context("s1", 10).await.unwrap();
        assert_eq!(msgs[0].content, "report.pdf");
    }

    #[tokio::test]
    async fn add_message_trims_beyond_window() {
        let cache = Arc::new(MemoryCache::new());
        let store = Arc::new(MemoryMessageStore::new());
        let ctx = ContextStore::new(cache.clone(), store, 3, Duration::from_secs(60));
        for i in 0..5 {
            ctx.add_message("s1", &msg(&format!("c{i}"), kind::TEXT)).await;
        }
        let cached = cache.lrange(&keys::context("s1"), 0, -1).await.unwrap();
        assert_eq!(cached.len(), 3);
        let first: ContextMessage = serde_json::from_str(&cached[0]).unwrap();
        assert_eq!(first.content, "c2");
    }

    #[tokio::test]
    async fn empty_session_yields_empty_context() {
        let ctx = ContextStore::new(
            Arc::new(MemoryCache::new()),
            Arc::new(MemoryMessageStore::new()),
            30,
            Duration::from_secs(60),
        );
        assert!(ctx.get_context("nope", 10).await.unwrap().is_empty());
    }

    #[test]
    fn summarize_kinds() {
        assert_eq!(summarize(&msg("x", kind::IMAGE)), "[image]");
        assert_eq!(summarize(&msg("x", kind::VOICE)), "[voice]");
        assert_eq!(summarize(&msg("notes.txt", kind::FILE)), "[file: notes.txt]");
        assert_eq!(summarize(&msg("plain words", kind::TEXT)), "plain words");
    }

    #[test]
    fn summarize_elides_think_and_reduces_tools() {
        let transcript = "<think>\nsecret reasoning\n</think>\n\n\
            <tool-call name=\"web_search\" arguments='{\"query\":\"cats\"}'></tool-call>\n\n\
            <tool-result name=\"web_search\" status=\"success\">\nresult body here\n</tool-result>\n\n\
            Final answer.";
        let s = summarize(&msg(transcript, kind::TEXT));
        assert!(!s.contains("secret reasoning"));
        assert!(s.contains("Final answer."));
        assert!(s.contains("web_search({\"query\":\"cats\"})"));
        assert!(s.contains("web_search/success: result body here"));
    }

    #[test]
    fn summarize_caps_length() {
        let long = "w".repeat(SUMMARY_MAX_CHARS * 2);
        let s = summarize(&msg(&long, kind::TEXT));
        assert_eq!(s.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn format_line_shape() {
        let line = format_line(&msg("hello", kind::TEXT), false);
        assert_eq!(line, "[2026-01-01 08:00:00] Ann: hello");
    }
}
