//! CCTV recorder – records every configured camera into 6-hour blocks on
//! disk, expires old dates, and serves the recordings over HTTP.
//!
//! This binary:
//! 1. Reads configuration from `cctv.toml` (writing defaults if missing)
//! 2. Resolves the ffmpeg binary and creates the storage root
//! 3. Starts one recording supervisor per camera plus the retention sweeper
//! 4. Runs an axum HTTP server over the on-disk index
//!
//! Ctrl-C / SIGTERM cancels every task; ffmpeg children are killed.

mod backoff;
mod ffmpeg;
mod server;
mod supervisor;
mod sweeper;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use cctv_common::config::Config;
use cctv_common::index::StorageLayout;

use crate::ffmpeg::{CaptureRunner, FfmpegRunner};
use crate::supervisor::Supervisor;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── load config ──────────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| Config::default_path().to_string());
    let config = cctv_common::config::load_or_init(&PathBuf::from(&config_path))
        .context("Config load failed")?;

    info!(
        "CCTV recorder starting ({} camera(s), storage={}, listen={})",
        config.cameras.len(),
        config.storage_dir.display(),
        config.serve_address
    );

    // ── prerequisites ────────────────────────────────────────────────
    let ffmpeg = ffmpeg::resolve_ffmpeg(config.ffmpeg_bin.as_deref())
        .context("Capture tool unavailable")?;
    std::fs::create_dir_all(&config.storage_dir)
        .context("Cannot create storage directory")?;

    let config = Arc::new(config);
    let layout = StorageLayout::new(config.storage_dir.clone());
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let fatal = Arc::new(AtomicBool::new(false));

    // ── ctrl-c ───────────────────────────────────────────────────────
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Shutdown signal received");
            cancel.cancel();
        })
        .context("Cannot set Ctrl-C handler")?;
    }

    // ── recording supervisors ────────────────────────────────────────
    let runner: Arc<dyn CaptureRunner> = Arc::new(FfmpegRunner::new(ffmpeg));
    for camera in &config.cameras {
        let Some(supervisor) = Supervisor::new(&config, camera, layout.clone(), runner.clone())
        else {
            info!("No URL for camera {}, skipping", camera.name);
            continue;
        };
        let cancel = cancel.clone();
        let fatal = fatal.clone();
        tracker.spawn(async move {
            if let Err(e) = supervisor.run(cancel.clone()).await {
                error!("Recording stopped: {e:#}");
                fatal.store(true, Ordering::Relaxed);
                cancel.cancel();
            }
        });
    }

    // ── retention sweeper ────────────────────────────────────────────
    tracker.spawn(sweeper::run(config.clone(), layout.clone(), cancel.clone()));

    // ── HTTP server ──────────────────────────────────────────────────
    {
        let (config, layout, cancel) = (config.clone(), layout.clone(), cancel.clone());
        let fatal = fatal.clone();
        tracker.spawn(async move {
            if let Err(e) = server::run(config, layout, cancel.clone()).await {
                error!("HTTP server error: {e:#}");
                fatal.store(true, Ordering::Relaxed);
                cancel.cancel();
            }
        });
    }
    tracker.close();

    // Run until a signal or a fatal task error
    cancel.cancelled().await;
    if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait()).await.is_err() {
        warn!("Shutdown timed out after {}s", SHUTDOWN_GRACE.as_secs());
    }

    if fatal.load(Ordering::Relaxed) {
        anyhow::bail!("CCTV recorder stopped after a fatal error");
    }
    info!("CCTV recorder stopped");
    Ok(())
}
