//! Run triggers: direct client endpoint, mention-routed gateway webhook,
//! and run inspection/cancellation.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use std::sync::{Arc, OnceLock};

use parley::context::ContextMessage;

use crate::app::AppState;
use crate::auth::UserContext;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct CreateRunRequest {
    pub input: String,
    pub chat_session_id: Option<String>,
    pub agent_user_id: Option<String>,
    pub chat_history: Option<Vec<ContextMessage>>,
}

/// `POST /runs` — create a run for the caller; executes asynchronously.
pub async fn create_run(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Json(req): Json<CreateRunRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.input.trim().is_empty() {
        return Err(ApiError::BadRequest("input must not be empty".into()));
    }
    let Some(session_id) = req.chat_session_id.filter(|s| !s.is_empty()) else {
        return Err(ApiError::BadRequest("chat_session_id is required".into()));
    };

    let services = &state.services;
    let agent = match &req.agent_user_id {
        Some(id) => services
            .agents
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("unknown agent: {id}")))?,
        None => services.agents.default_agent(),
    };
    let model = services.model_for(&agent)?;

    let run = services
        .registry
        .create(&user.user_id, &req.input, &session_id, &agent.user_id);
    tracing::info!(run_id = %run.id, user = %user.user_id, "run created");
    let created_at = run.created_at.to_rfc3339();
    let run_id = run.id.clone();
    services.spawn_run(run, agent, model, req.chat_history);

    Ok(Json(serde_json::json!({"run_id": run_id, "created_at": created_at})))
}

/// `GET /runs` — the caller's recent runs.
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    user: UserContext,
) -> Json<serde_json::Value> {
    let runs: Vec<serde_json::Value> = state
        .services
        .registry
        .list_by_user(&user.user_id)
        .iter()
        .map(|r| {
            serde_json::json!({
                "run_id": r.id,
                "chat_session_id": r.chat_session_id,
                "running": state.services.registry.is_running(&r.id),
                "created_at": r.created_at.to_rfc3339(),
            })
        })
        .collect();
    Json(serde_json::Value::Array(runs))
}

/// `GET /runs/{id}` — run metadata plus the running flag.
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run = state
        .services
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound("run not found".into()))?;
    if run.user_id != user.user_id {
        return Err(ApiError::Forbidden("not your run".into()));
    }
    Ok(Json(serde_json::json!({
        "run_id": run.id,
        "input": run.input,
        "chat_session_id": run.chat_session_id,
        "agent_user_id": run.agent_user_id,
        "running": state.services.registry.is_running(&run.id),
        "created_at": run.created_at.to_rfc3339(),
    })))
}

/// `POST /runs/{id}/cancel` — cooperative cancellation.
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let run = state
        .services
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound("run not found".into()))?;
    if run.user_id != user.user_id {
        return Err(ApiError::Forbidden("not your run".into()));
    }
    if !state.services.registry.cancel(&id) {
        return Err(ApiError::BadRequest("run is not running".into()));
    }
    Ok(Json(serde_json::json!({"message": "run cancelled", "run_id": id})))
}

#[derive(Deserialize)]
pub struct WebhookMessageRequest {
    pub chat_session_id: String,
    pub message_id: String,
    pub sender_user_id: String,
    pub agent_user_id: String,
    pub content: String,
}

/// Strips `@[name]{id}` mention markup down to `@name`.
pub fn strip_mentions(content: &str) -> String {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"@\[([^\]]+)\]\{([^}]+)\}").unwrap());
    re.replace_all(content, "@$1").trim().to_string()
}

/// `POST /webhook/message` — called by the gateway when a newly-persisted
/// user message mentions an agent. Idempotence on `message_id` is the
/// gateway's concern.
pub async fn webhook_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WebhookMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let services = &state.services;
    let agent = services
        .agents
        .get(&req.agent_user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown agent: {}", req.agent_user_id)))?;
    let model = services.model_for(&agent)?;

    let input = strip_mentions(&req.content);
    if input.is_empty() {
        return Err(ApiError::BadRequest("message has no content".into()));
    }

    let run = services.registry.create(
        &req.sender_user_id,
        &input,
        &req.chat_session_id,
        &agent.user_id,
    );
    tracing::info!(
        run_id = %run.id,
        message_id = %req.message_id,
        session = %req.chat_session_id,
        "webhook run created"
    );
    let run_id = run.id.clone();
    services.spawn_run(run, agent, model, None);

    Ok(Json(serde_json::json!({"run_id": run_id})))
}
