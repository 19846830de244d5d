//! HTTP server exposing the recordings for browsing and playback.
//!
//! Routes:
//!   GET /api/health                                → health check
//!   GET /api/cameras                               → configured cameras
//!   GET /api/cameras/{name}                        → dates, blocks and segments
//!   GET /api/cameras/{name}/{date}/{block}/chunks  → chunk numbers per playlist
//!   GET /videos/...                                → playlists and chunks
//!   GET /...                                       → browsing UI (`ui_dir`)
//!
//! Everything is read straight from the on-disk index; the server never
//! talks to the recording supervisors.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

use cctv_common::block::BlockLabel;
use cctv_common::config::Config;
use cctv_common::index::{parse_date_dir, StorageLayout};
use cctv_common::protocol::{AvailableDate, CameraInfo, HealthResponse, PlaylistChunks};

/// Shared state for route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    layout: StorageLayout,
    start_time: Instant,
}

/// Build the router; split from [`run`] so tests can drive it directly.
pub fn router(config: Arc<Config>, layout: StorageLayout) -> Router {
    let videos = ServeDir::new(layout.root());
    let ui_dir = config.ui_dir.clone();
    let state = AppState {
        config,
        layout,
        start_time: Instant::now(),
    };

    let mut app = Router::new()
        .route("/api/health", get(health))
        .route("/api/cameras", get(list_cameras))
        .route("/api/cameras/{name}", get(camera_dates))
        .route("/api/cameras/{name}/{date}/{block}/chunks", get(block_chunks))
        .nest_service("/videos", videos);
    if let Some(dir) = ui_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve until `cancel` fires.
pub async fn run(
    config: Arc<Config>,
    layout: StorageLayout,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listen_addr = config.serve_address.clone();
    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Cannot bind {listen_addr}"))?;
    info!("Query server listening on http://{listen_addr}");

    axum::serve(listener, router(config, layout))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("Query server stopped");
    Ok(())
}

// ── route handlers ───────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn list_cameras(State(state): State<AppState>) -> Json<Vec<CameraInfo>> {
    let config = &state.config;
    Json(
        config
            .cameras
            .iter()
            .map(|c| CameraInfo {
                name: c.name.clone(),
                color: c.color.clone(),
                retention_days: config.retention_days_for(c),
                recording: c.capture_url().is_some(),
            })
            .collect(),
    )
}

async fn camera_dates(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<AvailableDate>>, StatusCode> {
    if state.config.camera(&name).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(state.layout.list_available(&name)))
}

async fn block_chunks(
    State(state): State<AppState>,
    Path((name, date, block)): Path<(String, String, String)>,
) -> Result<Json<Vec<PlaylistChunks>>, StatusCode> {
    if state.config.camera(&name).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    let date = parse_date_dir(&date).ok_or(StatusCode::BAD_REQUEST)?;
    let label: BlockLabel = block.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(state.layout.list_chunk_indices(&name, date, label)))
}
