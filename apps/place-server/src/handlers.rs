//! Public HTTP surface and router assembly.

use std::io::Cursor;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image::ImageFormat;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::state::SharedState;
use crate::websocket::ws_handler;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/place.png", get(place_png))
        .route("/stats", get(stats))
        .route("/save", get(save))
        .route("/safe-restart", get(safe_restart))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Current canvas as a PNG, uncacheable so viewers always start fresh.
async fn place_png(State(state): State<SharedState>) -> Response {
    let img = state.canvas.to_image();
    let mut cursor = Cursor::new(Vec::new());
    if let Err(err) = img.write_to(&mut cursor, ImageFormat::Png) {
        error!(%err, "failed to encode canvas");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [
            (header::CONTENT_TYPE, "image/png"),
            (
                header::CACHE_CONTROL,
                "no-cache, no-store, must-revalidate",
            ),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        cursor.into_inner(),
    )
        .into_response()
}

/// Live connection count as plain text.
async fn stats(State(state): State<SharedState>) -> String {
    state.registry.total().to_string()
}

/// Synchronous snapshot on demand; the archival copy runs out of band.
async fn save(State(state): State<SharedState>) -> StatusCode {
    match state.snapshots.save_and_archive(&state.canvas).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            error!(%err, "requested canvas save failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Snapshot, then exit 0 and let the supervisor bring us back up.
async fn safe_restart(State(state): State<SharedState>) -> Response {
    if let Err(err) = state.snapshots.save_and_archive(&state.canvas).await {
        error!(%err, "canvas save before restart failed");
    }
    info!("restarting on request");
    std::process::exit(0);
}

/// Serve the router on an already-bound listener. Split out of `main` so
/// integration tests can run the real stack on an ephemeral port.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: SharedState,
) -> Result<(), std::io::Error> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}
