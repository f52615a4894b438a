//! HTTP surface for the agent runtime (axum).
//!
//! Routes: run triggers (`POST /runs`, gateway `POST /webhook/message`),
//! run inspection and cancellation, the session SSE stream
//! (`GET /events/session/{id}` with `Last-Event-ID`), approval resolution,
//! and agent identity endpoints.
//!
//! **Public API**: [`router`], [`run_serve`], [`run_serve_on_listener`],
//! [`AppState`].

mod agents;
mod app;
mod approvals;
mod auth;
mod error;
mod events;
mod runs;

use std::sync::Arc;
use tokio::net::TcpListener;

use parley::Services;

pub use app::{router, AppState};
pub use auth::UserContext;
pub use error::ApiError;
pub use runs::strip_mentions;

/// Serves on an existing listener; used by tests (bind 127.0.0.1:0 first).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    services: Arc<Services>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    tracing::info!("agent server listening on http://{addr}");
    let app = router(Arc::new(AppState { services: services.clone() }));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    services.shutdown().await;
    Ok(())
}

/// Binds the configured address and serves until interrupted.
pub async fn run_serve(
    services: Arc<Services>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(&services.settings.bind_addr).await?;
    run_serve_on_listener(listener, services).await
}
