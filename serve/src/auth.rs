//! Identity extraction. The gateway authenticates and injects
//! `X-User-Id` / `X-User-Nickname` / `X-Session-Id`; in development mode a
//! `?user_id=` query fallback is accepted.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::sync::Arc;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Clone, Debug)]
pub struct UserContext {
    pub user_id: String,
    pub session_id: Option<String>,
    pub nickname: Option<String>,
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn query_param(parts: &Parts, name: &str) -> Option<String> {
    parts.uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name && !v.is_empty()).then(|| v.to_string())
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for UserContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, "X-User-Id").or_else(|| {
            if state.services.settings.dev_auth_fallback {
                query_param(parts, "user_id")
            } else {
                None
            }
        });
        let Some(user_id) = user_id else {
            return Err(ApiError::Unauthorized("missing X-User-Id header".into()));
        };
        Ok(UserContext {
            user_id,
            session_id: header(parts, "X-Session-Id").or_else(|| query_param(parts, "session_id")),
            nickname: header(parts, "X-User-Nickname"),
        })
    }
}
