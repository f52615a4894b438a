//! Agent identity endpoints: the catalog for mention pickers and
//! bot-to-session membership.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::UserContext;
use crate::error::ApiError;

/// `GET /agents` — configured agent identities.
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    _user: UserContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agents: Vec<serde_json::Value> = state
        .services
        .agents
        .list()
        .await?
        .iter()
        .map(|a| {
            serde_json::json!({
                "user_id": a.user_id,
                "nickname": a.nickname,
                "description": a.description,
                "model": a.model,
                "provider": a.provider,
            })
        })
        .collect();
    Ok(Json(serde_json::Value::Array(agents)))
}

#[derive(Deserialize)]
pub struct AddToSessionRequest {
    pub chat_session_id: String,
    pub agent_user_id: String,
}

/// `POST /agents/add-to-session` — idempotent membership insert so the
/// gateway starts relaying the session to the bot.
pub async fn add_to_session(
    State(state): State<Arc<AppState>>,
    _user: UserContext,
    Json(req): Json<AddToSessionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let services = &state.services;
    if services.agents.get(&req.agent_user_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "unknown agent: {}",
            req.agent_user_id
        )));
    }
    let added = services
        .agents
        .add_to_session(&req.chat_session_id, &req.agent_user_id)
        .await?;
    Ok(Json(serde_json::json!({
        "chat_session_id": req.chat_session_id,
        "agent_user_id": req.agent_user_id,
        "added": added,
    })))
}
