//! Dual write for finished agent messages: synchronous cache append plus a
//! single asynchronous database writer task with an unbounded intake queue.
//! Producers never block on the database; a caller that needs the row to be
//! visible before continuing (publishing `agent_done`) passes `wait_db`.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::context::{kind, ContextMessage, ContextStore};
use crate::store::{AgentMessageRow, MessageStore, StoreError};

/// Transient DB failures are retried this many times with doubling delay.
const WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

/// A finished agent message before persistence.
#[derive(Clone, Debug)]
pub struct AgentMessage {
    pub message_id: String,
    pub session_id: String,
    /// The agent identity's user id (the row's sender).
    pub user_id: String,
    /// Canonical serialized transcript.
    pub content: String,
    /// `{model, provider, tool_calls[], run_id}`.
    pub metadata: Value,
    pub create_time: String,
}

impl AgentMessage {
    pub fn new(
        message_id: String,
        session_id: String,
        user_id: String,
        content: String,
        metadata: Value,
    ) -> Self {
        Self {
            message_id,
            session_id,
            user_id,
            content,
            metadata,
            create_time: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn to_context_message(&self, nickname: &str) -> ContextMessage {
        ContextMessage {
            message_id: self.message_id.clone(),
            user_id: self.user_id.clone(),
            nickname: nickname.to_string(),
            message_type: kind::TEXT,
            content: self.content.clone(),
            create_time: self.create_time.clone(),
            is_agent: true,
        }
    }

    fn to_row(&self) -> AgentMessageRow {
        AgentMessageRow {
            message_id: self.message_id.clone(),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            content: self.content.clone(),
            create_time: self.create_time.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("writer is stopped")]
    Stopped,
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct WriteJob {
    row: AgentMessageRow,
    ack: Option<oneshot::Sender<Result<(), StoreError>>>,
}

/// Cache + DB writer. One background task consumes the intake queue in
/// FIFO order, so messages enqueued for the same run land in enqueue order.
pub struct DualWriter {
    context: Arc<ContextStore>,
    tx: Mutex<Option<mpsc::UnboundedSender<WriteJob>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DualWriter {
    /// Spawns the background writer task.
    pub fn start(store: Arc<dyn MessageStore>, context: Arc<ContextStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(writer_loop(store, rx));
        tracing::info!("dual writer started");
        Self {
            context,
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Cache-appends the message under its session key, then enqueues the
    /// DB write. With `wait_db` the call returns only after the row is
    /// committed (or the retry budget is exhausted).
    pub async fn write_agent_message(
        &self,
        msg: &AgentMessage,
        nickname: &str,
        wait_db: bool,
    ) -> Result<(), WriterError> {
        self.context
            .add_message(&msg.session_id, &msg.to_context_message(nickname))
            .await;

        let (ack_tx, ack_rx) = if wait_db {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        {
            let guard = self.tx.lock().unwrap_or_else(|e| e.into_inner());
            let tx = guard.as_ref().ok_or(WriterError::Stopped)?;
            tx.send(WriteJob { row: msg.to_row(), ack: ack_tx })
                .map_err(|_| WriterError::Stopped)?;
        }

        if let Some(rx) = ack_rx {
            match rx.await {
                Ok(result) => result?,
                Err(_) => return Err(WriterError::Stopped),
            }
        }
        Ok(())
    }

    /// Closes the intake and waits for queued writes to drain.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(tx);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("dual writer stopped");
    }
}

async fn writer_loop(store: Arc<dyn MessageStore>, mut rx: mpsc::UnboundedReceiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let mut result = Ok(());
        for attempt in 0..WRITE_ATTEMPTS {
            result = store.insert_agent_message(&job.row).await;
            match &result {
                Ok(()) => {
                    tracing::debug!(message_id = %job.row.message_id, "agent message persisted");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        message_id = %job.row.message_id,
                        attempt,
                        error = %e,
                        "agent message write failed"
                    );
                    if attempt + 1 < WRITE_ATTEMPTS {
                        tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        if let Err(e) = &result {
            tracing::error!(message_id = %job.row.message_id, error = %e, "agent message write gave up");
        }
        if let Some(ack) = job.ack {
            let _ = ack.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys, Cache, MemoryCache};
    use crate::store::MemoryMessageStore;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryMessageStore>, Arc<MemoryCache>, DualWriter) {
        let store = Arc::new(MemoryMessageStore::new());
        let cache = Arc::new(MemoryCache::new());
        let context = Arc::new(ContextStore::new(
            cache.clone(),
            store.clone(),
            30,
            Duration::from_secs(60),
        ));
        let writer = DualWriter::start(store.clone(), context);
        (store, cache, writer)
    }

    fn message(id: &str, content: &str) -> AgentMessage {
        AgentMessage::new(
            id.to_string(),
            "s1".to_string(),
            "agent-x".to_string(),
            content.to_string(),
            serde_json::json!({"run_id": "run-1"}),
        )
    }

    #[tokio::test]
    async fn wait_db_blocks_until_row_is_visible() {
        let (store, cache, writer) = setup();
        writer
            .write_agent_message(&message("m1", "hello"), "Bot", true)
            .await
            .unwrap();
        assert_eq!(store.message_content("m1").as_deref(), Some("hello"));

        let cached = cache.lrange(&keys::context("s1"), 0, -1).await.unwrap();
        assert_eq!(cached.len(), 1);
        let ctx: ContextMessage = serde_json::from_str(&cached[0]).unwrap();
        assert!(ctx.is_agent);
        assert_eq!(ctx.nickname, "Bot");
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn fire_and_forget_write_lands_eventually() {
        let (store, _cache, writer) = setup();
        writer
            .write_agent_message(&message("m1", "async"), "Bot", false)
            .await
            .unwrap();
        writer.shutdown().await;
        assert_eq!(store.message_content("m1").as_deref(), Some("async"));
    }

    #[tokio::test]
    async fn same_run_writes_apply_in_enqueue_order() {
        let (store, _cache, writer) = setup();
        writer
            .write_agent_message(&message("m1", "first"), "Bot", false)
            .await
            .unwrap();
        writer
            .write_agent_message(&message("m1", "second"), "Bot", true)
            .await
            .unwrap();
        assert_eq!(store.message_content("m1").as_deref(), Some("second"));
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn write_after_shutdown_errors() {
        let (_store, _cache, writer) = setup();
        writer.shutdown().await;
        let err = writer
            .write_agent_message(&message("m1", "late"), "Bot", true)
            .await
            .unwrap_err();
        assert!(matches!(err, WriterError::Stopped));
    }
}
