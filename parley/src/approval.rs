//! Pending tool-call approvals: suspension and resumption of execution.
//!
//! A gated tool creates a request (which publishes `interruption` on the
//! run's session topic) and waits on its one-shot signal. The owning user
//! resolves it over HTTP; anything other than an approval yields a stub
//! result to the model and the run continues. Entries are in-memory only
//! and are garbage-collected once the waiter has observed a terminal
//! status.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::bus::EventBus;
use session_event::{ApprovalInfo, SessionEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub id: String,
    pub run_id: String,
    pub session_id: String,
    pub user_id: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub reason: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("approval not found")]
    NotFound,
    #[error("only the owning user may resolve an approval")]
    Forbidden,
    #[error("approval already resolved: {0}")]
    AlreadyResolved(&'static str),
}

struct Entry {
    request: ApprovalRequest,
    status: Mutex<ApprovalStatus>,
    signal: Notify,
}

#[derive(Clone)]
pub struct ApprovalStore {
    bus: EventBus,
    entries: Arc<DashMap<String, Arc<Entry>>>,
    timeout: Duration,
}

impl ApprovalStore {
    pub fn new(bus: EventBus, timeout: Duration) -> Self {
        Self { bus, entries: Arc::new(DashMap::new()), timeout }
    }

    /// Registers a pending approval and publishes `interruption` on the
    /// run's session topic.
    pub fn create(
        &self,
        run_id: &str,
        session_id: &str,
        user_id: &str,
        tool_name: &str,
        tool_args: Value,
        reason: String,
    ) -> ApprovalRequest {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let request = ApprovalRequest {
            id: format!("approval-{}", &hex[..12]),
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            tool_name: tool_name.to_string(),
            tool_args,
            reason,
        };
        self.entries.insert(
            request.id.clone(),
            Arc::new(Entry {
                request: request.clone(),
                status: Mutex::new(ApprovalStatus::Pending),
                signal: Notify::new(),
            }),
        );
        self.bus.publish(
            session_id,
            &SessionEvent::Interruption {
                approval: ApprovalInfo {
                    id: request.id.clone(),
                    tool_name: request.tool_name.clone(),
                    tool_args: request.tool_args.clone(),
                    reason: request.reason.clone(),
                    status: ApprovalStatus::Pending.as_str().to_string(),
                },
            },
        );
        tracing::info!(approval_id = %request.id, run_id, tool_name, "approval requested");
        request
    }

    /// Blocks until the approval is resolved or the configured timeout
    /// elapses (then the status becomes `expired`). The entry is removed
    /// before returning; an unknown id reads as expired.
    pub async fn wait(&self, approval_id: &str) -> ApprovalStatus {
        let Some(entry) = self.entries.get(approval_id).map(|e| Arc::clone(&e)) else {
            return ApprovalStatus::Expired;
        };

        let status = {
            let current = *entry.status.lock().unwrap_or_else(|e| e.into_inner());
            if current != ApprovalStatus::Pending {
                current
            } else {
                match tokio::time::timeout(self.timeout, entry.signal.notified()).await {
                    Ok(()) => *entry.status.lock().unwrap_or_else(|e| e.into_inner()),
                    Err(_) => {
                        let mut guard = entry.status.lock().unwrap_or_else(|e| e.into_inner());
                        if *guard == ApprovalStatus::Pending {
                            *guard = ApprovalStatus::Expired;
                        }
                        *guard
                    }
                }
            }
        };

        self.entries.remove(approval_id);
        tracing::info!(approval_id, status = status.as_str(), "approval wait finished");
        status
    }

    /// Applies the user's decision. Fails for unknown ids, non-owners, and
    /// approvals that already left `pending` — an approval transitions at
    /// most once.
    pub fn resolve(
        &self,
        approval_id: &str,
        approved: bool,
        by_user: &str,
    ) -> Result<ApprovalStatus, ResolveError> {
        let entry = self
            .entries
            .get(approval_id)
            .map(|e| Arc::clone(&e))
            .ok_or(ResolveError::NotFound)?;
        if entry.request.user_id != by_user {
            return Err(ResolveError::Forbidden);
        }

        let status = {
            let mut guard = entry.status.lock().unwrap_or_else(|e| e.into_inner());
            if *guard != ApprovalStatus::Pending {
                return Err(ResolveError::AlreadyResolved(guard.as_str()));
            }
            *guard = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            *guard
        };

        self.bus.publish(
            &entry.request.session_id,
            &SessionEvent::ApprovalResolved {
                approval_id: approval_id.to_string(),
                status: status.as_str().to_string(),
                resolved_by: by_user.to_string(),
            },
        );
        entry.signal.notify_one();
        tracing::info!(approval_id, status = status.as_str(), by_user, "approval resolved");
        Ok(status)
    }

    /// Pending request metadata, if the approval is still live.
    pub fn get(&self, approval_id: &str) -> Option<ApprovalRequest> {
        self.entries.get(approval_id).map(|e| e.request.clone())
    }
}
