//! SSE subscription endpoint for a session topic, with `Last-Event-ID`
//! resumption.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, Request, Response};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::UserContext;
use crate::error::ApiError;

fn last_event_id(headers: &HeaderMap, query: Option<&str>) -> Option<u64> {
    if let Some(id) = headers
        .get("Last-Event-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
    {
        return Some(id);
    }
    query?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == "last_event_id").then(|| v.parse().ok()).flatten()
    })
}

/// `GET /events/session/{session_id}` — the live frame stream of a session
/// topic: `init`, replay after `Last-Event-ID`, then the live tail with
/// heartbeats.
pub async fn subscribe_session(
    State(state): State<Arc<AppState>>,
    user: UserContext,
    Path(session_id): Path<String>,
    request: Request<Body>,
) -> Result<Response<Body>, ApiError> {
    let since = last_event_id(request.headers(), request.uri().query());
    tracing::info!(session = %session_id, user = %user.user_id, ?since, "sse subscription");

    let subscription = state.services.bus.subscribe(&session_id, since);
    let stream = subscription
        .frames()
        .map(|frame| Ok::<_, Infallible>(axum::body::Bytes::from(frame)));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
