//! Retention sweeper – once a day, deletes every date partition that has
//! aged past its camera's retention horizon.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cctv_common::config::Config;
use cctv_common::index::{parse_date_dir, StorageLayout};
use cctv_common::retention::{cutoff_date, is_expired};

/// Outcome of one sweep over all cameras.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub failed: usize,
}

/// Delete every date directory older than each camera's cutoff, `today`
/// being the current local date.
///
/// Listing or deletion failures are logged and counted; they never stop the
/// sweep of the remaining dates and cameras.
pub fn sweep(config: &Config, layout: &StorageLayout, today: NaiveDate) -> SweepReport {
    let mut report = SweepReport::default();

    for camera in &config.cameras {
        let cutoff = cutoff_date(today, config.retention_days_for(camera));
        let camera_dir = layout.camera_dir(&camera.name);
        let entries = match fs::read_dir(&camera_dir) {
            Ok(entries) => entries,
            // nothing recorded yet
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!("Cannot list {}: {e}", camera_dir.display());
                report.failed += 1;
                continue;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if parse_date_dir(name).is_none() || !is_expired(name, cutoff) {
                continue;
            }

            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!("Deleted old data: {}", path.display());
                    report.deleted.push(path);
                }
                Err(e) => {
                    warn!("Failed to delete {}: {e}", path.display());
                    report.failed += 1;
                }
            }
        }
    }

    report
}

/// Time from `now` until the next local midnight.
pub fn until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let fallback = Duration::from_secs(24 * 60 * 60);
    let Some(tomorrow) = now.date_naive().succ_opt() else {
        return fallback;
    };
    let midnight = tomorrow.and_time(NaiveTime::MIN);
    match now.timezone().from_local_datetime(&midnight).earliest() {
        Some(midnight) => midnight
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(fallback),
        // midnight skipped by a DST jump; fall back to wall-clock arithmetic
        None => (midnight - now.naive_local()).to_std().unwrap_or(fallback),
    }
}

/// Sweep now, then again after every local midnight, until cancelled.
pub async fn run(config: Arc<Config>, layout: StorageLayout, cancel: CancellationToken) {
    info!("Retention sweeper started");

    loop {
        let now = Local::now();
        let today = now.date_naive();
        let (sweep_config, sweep_layout) = (config.clone(), layout.clone());
        match tokio::task::spawn_blocking(move || sweep(&sweep_config, &sweep_layout, today)).await
        {
            Ok(report) => info!(
                "Retention sweep done: {} deleted, {} failed",
                report.deleted.len(),
                report.failed
            ),
            Err(e) => error!("Retention sweep aborted: {e}"),
        }

        let wait = until_next_midnight(&Local::now());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!("Retention sweeper stopped");
}
