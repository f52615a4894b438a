//! Approval resolution endpoint.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::UserContext;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
}

/// `POST /approvals/{id}` — the owning user accepts or rejects a pending
/// tool call; the suspended run resumes either way.
pub async fn resolve_approval(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(id): Path<String>,
    Json(decision): Json<ApprovalDecision>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = state
        .services
        .approvals
        .resolve(&id, decision.approved, &user.user_id)?;
    Ok(Json(serde_json::json!({
        "approval_id": id,
        "status": status.as_str(),
    })))
}
