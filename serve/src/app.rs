//! Axum app: shared state and router.

use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

use parley::Services;

use crate::{agents, approvals, events, runs};

pub struct AppState {
    pub services: Arc<Services>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/runs", post(runs::create_run).get(runs::list_runs))
        .route("/runs/:id", get(runs::get_run))
        .route("/runs/:id/cancel", post(runs::cancel_run))
        .route("/webhook/message", post(runs::webhook_message))
        .route("/events/session/:session_id", get(events::subscribe_session))
        .route("/approvals/:id", post(approvals::resolve_approval))
        .route("/agents", get(agents::list_agents))
        .route("/agents/add-to-session", post(agents::add_to_session))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}
