//! In-memory registry of live runs: the Run record, a cancellation token,
//! and the orchestrator task handle. Nothing here is persisted; on restart
//! subscribers reconnect and resume from the database.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One agent execution from trigger to terminal event.
#[derive(Clone, Debug)]
pub struct Run {
    pub id: String,
    pub user_id: String,
    pub chat_session_id: String,
    pub agent_user_id: String,
    pub input: String,
    pub created_at: DateTime<Utc>,
}

struct RunHandle {
    run: Run,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<String, Arc<RunHandle>>>,
}

/// Cap applied to per-user listings.
const LIST_LIMIT: usize = 20;

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(
        &self,
        user_id: &str,
        input: &str,
        chat_session_id: &str,
        agent_user_id: &str,
    ) -> Run {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let run = Run {
            id: format!("run-{}", &hex[..12]),
            user_id: user_id.to_string(),
            chat_session_id: chat_session_id.to_string(),
            agent_user_id: agent_user_id.to_string(),
            input: input.to_string(),
            created_at: Utc::now(),
        };
        self.runs.insert(
            run.id.clone(),
            Arc::new(RunHandle {
                run: run.clone(),
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        );
        run
    }

    /// Attaches the spawned orchestrator task so `is_running` and `cancel`
    /// can observe it.
    pub fn register_task(&self, run_id: &str, task: JoinHandle<()>) {
        if let Some(handle) = self.runs.get(run_id) {
            *handle.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        }
    }

    pub fn get(&self, run_id: &str) -> Option<Run> {
        self.runs.get(run_id).map(|h| h.run.clone())
    }

    /// The cooperative stop flag the orchestrator polls between provider
    /// events and tool calls.
    pub fn cancel_token(&self, run_id: &str) -> Option<CancellationToken> {
        self.runs.get(run_id).map(|h| h.cancel.clone())
    }

    /// Signals cooperative cancellation. Idempotent; returns whether the
    /// run was still running when the signal was raised.
    pub fn cancel(&self, run_id: &str) -> bool {
        let Some(handle) = self.runs.get(run_id) else {
            return false;
        };
        let was_running = self.is_running(run_id);
        handle.cancel.cancel();
        was_running
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.runs
            .get(run_id)
            .and_then(|h| {
                h.task
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .as_ref()
                    .map(|t| !t.is_finished())
            })
            .unwrap_or(false)
    }

    /// Newest-first runs of one user, capped.
    pub fn list_by_user(&self, user_id: &str) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .iter()
            .filter(|e| e.value().run.user_id == user_id)
            .map(|e| e.value().run.clone())
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        runs.truncate(LIST_LIMIT);
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get() {
        let reg = RunRegistry::new();
        let run = reg.create("u1", "hello", "s1", "agent-x");
        assert!(run.id.starts_with("run-"));
        let got = reg.get(&run.id).unwrap();
        assert_eq!(got.input, "hello");
        assert_eq!(got.chat_session_id, "s1");
        assert!(reg.get("run-missing").is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_flips_token() {
        let reg = RunRegistry::new();
        let run = reg.create("u1", "x", "s1", "a");
        let token = reg.cancel_token(&run.id).unwrap();
        assert!(!token.is_cancelled());
        reg.cancel(&run.id);
        reg.cancel(&run.id);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn is_running_tracks_task_lifetime() {
        let reg = RunRegistry::new();
        let run = reg.create("u1", "x", "s1", "a");
        assert!(!reg.is_running(&run.id));

        let token = reg.cancel_token(&run.id).unwrap();
        let task = tokio::spawn(async move { token.cancelled().await });
        reg.register_task(&run.id, task);
        assert!(reg.is_running(&run.id));

        assert!(reg.cancel(&run.id));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!reg.is_running(&run.id));
    }

    #[tokio::test]
    async fn list_by_user_filters_and_caps() {
        let reg = RunRegistry::new();
        for _ in 0..25 {
            reg.create("u1", "x", "s1", "a");
        }
        reg.create("u2", "y", "s1", "a");
        let runs = reg.list_by_user("u1");
        assert_eq!(runs.len(), 20);
        assert!(runs.iter().all(|r| r.user_id == "u1"));
    }
}
