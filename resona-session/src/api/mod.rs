//! REST command surface and SSE event feed
//!
//! Route-per-command under `/api/v1`; each connected SSE client is a
//! registered hub observer whose stream starts with the catch-up
//! snapshot.

pub mod handlers;
pub mod sse;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{Error, Result};
use crate::hub::SessionHub;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SessionHub>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::HubClosed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest(
            "/api/v1",
            Router::new()
                // Transport
                .route("/playback/play", post(handlers::play))
                .route("/playback/pause", post(handlers::pause))
                .route("/playback/stop", post(handlers::stop))
                .route("/playback/play-pause", post(handlers::play_pause))
                .route("/playback/seek", post(handlers::seek))
                .route("/playback/fast-forward", post(handlers::fast_forward))
                .route("/playback/rewind", post(handlers::rewind))
                // Settings
                .route("/settings/quality", post(handlers::set_quality))
                .route("/settings/audio-effect", post(handlers::set_audio_effect))
                .route("/settings/wifi-only", post(handlers::set_wifi_only))
                .route("/settings/ignore-focus", post(handlers::set_ignore_focus))
                // Sleep timer
                .route(
                    "/sleep-timer",
                    post(handlers::start_sleep_timer).delete(handlers::cancel_sleep_timer),
                )
                // Playlist
                .route("/playlist", post(handlers::set_playlist))
                .route("/playlist/position", post(handlers::set_playlist_position))
                .route("/playlist/mode", post(handlers::set_play_mode))
                // State + events
                .route("/state", get(handlers::get_state))
                .route("/events", get(sse::events)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until `shutdown` resolves.
pub async fn run(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("bind {addr}: {e}")))?;
    info!("HTTP API listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(e.to_string()))?;
    Ok(())
}
