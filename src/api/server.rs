//! HTTP server setup: router and API routes.

use super::archive::{archive_status, run_archive};
use super::channels::{channel_messages, export_channel, list_channels, register_channel};
use super::state::ApiState;

use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

/// Build the API router around `state`.
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/channels", get(list_channels).post(register_channel))
        .route("/channels/{channel_id}/messages", get(channel_messages))
        .route("/channels/{channel_id}/export", post(export_channel))
        .route("/archive", post(run_archive))
        .route("/archive/status", get(archive_status));

    Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the given address.
///
/// The server drains in-flight requests and exits once `shutdown` fires.
pub async fn start_http_server(
    bind: SocketAddr,
    state: Arc<ApiState>,
    shutdown: CancellationToken,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "HTTP server listening");

    let handle = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            tracing::error!(%error, "HTTP server exited with error");
        }
    });

    Ok(handle)
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}
