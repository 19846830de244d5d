//! Recording supervisor – keeps one camera's capture running, one bounded
//! invocation per block, forever.
//!
//! Each turn of the loop derives the current block from the wall clock,
//! makes sure its directory exists and runs the capture tool for whatever
//! is left of the block.  A clean exit means the block is done and the next
//! one starts right away, under a fresh playlist stamp; a failed run waits
//! out the backoff delay first.
//! Nothing is persisted between turns: after a restart the next turn simply
//! resumes in whatever block the clock says it is.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use cctv_common::block::RecordingWindow;
use cctv_common::config::{Camera, Config};
use cctv_common::index::{playlist_stamp, StorageLayout};

use crate::backoff::Backoff;
use crate::ffmpeg::{CaptureRunner, Invocation};

/// Pause before re-reading the clock when the current block has no usable
/// time left.
const BOUNDARY_WAIT: Duration = Duration::from_secs(1);

/// Source of the local wall-clock time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

pub struct Supervisor {
    camera: String,
    input_url: String,
    transport: String,
    hls_time_secs: u32,
    layout: StorageLayout,
    runner: Arc<dyn CaptureRunner>,
    backoff: Backoff,
    clock: Clock,
}

impl Supervisor {
    /// Supervisor for `camera`, or `None` if the camera has no capture URL.
    pub fn new(
        config: &Config,
        camera: &Camera,
        layout: StorageLayout,
        runner: Arc<dyn CaptureRunner>,
    ) -> Option<Self> {
        let input_url = camera.capture_url()?.to_string();
        Some(Self {
            camera: camera.name.clone(),
            input_url,
            transport: config.transport_for(camera).to_string(),
            hls_time_secs: config.hls_time_secs,
            layout,
            runner,
            backoff: Backoff::new(config.retry_backoff()),
            clock: local_clock(),
        })
    }

    /// Read the time from `clock` instead of the local wall clock.
    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until `cancel` fires.
    ///
    /// Only a block directory that cannot be created ends the loop with an
    /// error; storage is a hard prerequisite, so the caller should stop the
    /// whole process.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Recording supervisor started for camera {}", self.camera);

        loop {
            let now = (self.clock)();
            let window = RecordingWindow::at(now);
            let duration_secs = window.remaining_secs();
            if duration_secs == 0 {
                debug!("Camera {}: at block boundary, waiting", self.camera);
                if !sleep_or_cancel(BOUNDARY_WAIT, &cancel).await {
                    break;
                }
                continue;
            }

            let date = window.date();
            let label = window.label();
            let block_dir = self.layout.ensure_block_dir(&self.camera, date, label)?;
            let stamp = playlist_stamp(now);
            // An earlier run stamped this second (quick clean exit, or the
            // repeated hour after a DST fall-back); never write over it.
            if StorageLayout::stamp_in_use(&block_dir, &stamp) {
                debug!("Camera {}: playlist {stamp} exists, waiting", self.camera);
                if !sleep_or_cancel(until_next_second(now), &cancel).await {
                    break;
                }
                continue;
            }

            let invocation = Invocation {
                camera: self.camera.clone(),
                input_url: self.input_url.clone(),
                transport: self.transport.clone(),
                duration_secs,
                hls_time_secs: self.hls_time_secs,
                paths: StorageLayout::invocation_paths(&block_dir, &stamp),
            };

            info!(
                "Record starting: camera={} date={} block={} playlist={} duration={}s",
                self.camera,
                date,
                label,
                invocation.paths.playlist.display(),
                duration_secs,
            );
            debug!("ffmpeg args: {:?}", invocation.args());

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.runner.run(&invocation) => result,
            };

            match result {
                Ok(()) => {
                    self.backoff.reset();
                    info!("Camera {}: block {date} {label} finished", self.camera);
                }
                Err(e) => {
                    let delay = self.backoff.on_failure();
                    error!(
                        "Failed to record camera {} (attempt {}): {e:#}",
                        self.camera,
                        self.backoff.failures()
                    );
                    let next = (self.clock)()
                        + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                    info!(
                        "Camera {}: next attempt at {}",
                        self.camera,
                        next.format("%Y-%m-%d %H:%M:%S")
                    );
                    if !sleep_or_cancel(delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!("Recording supervisor for camera {} stopped", self.camera);
        Ok(())
    }
}

fn until_next_second(now: NaiveDateTime) -> Duration {
    let nanos = u64::from(now.nanosecond() % 1_000_000_000);
    Duration::from_nanos(1_000_000_000 - nanos)
}

/// Sleep for `delay`; `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
