//! Capture tool – locates ffmpeg and runs one bounded HLS capture per
//! invocation.
//!
//! ffmpeg does all the media work: it pulls the camera stream, drops the
//! audio, copies the video untouched and cuts it into numbered `.ts`
//! chunks plus a playlist.  The `-t` bound makes it stop on its own when
//! the current block ends.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use cctv_common::index::InvocationPaths;

/// Socket I/O timeout for RTSP inputs, in microseconds.
const RTSP_TIMEOUT_US: &str = "10000000";

/// One bounded run of the capture tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub camera: String,
    pub input_url: String,
    pub transport: String,
    /// Upper bound on the run time, in seconds.
    pub duration_secs: u64,
    pub hls_time_secs: u32,
    pub paths: InvocationPaths,
}

impl Invocation {
    /// ffmpeg command line, without the binary.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "warning"]
            .into_iter()
            .map(String::from)
            .collect();

        if is_rtsp(&self.input_url) {
            args.extend([
                "-rtsp_transport".to_string(),
                self.transport.clone(),
                "-timeout".to_string(),
                RTSP_TIMEOUT_US.to_string(),
            ]);
        }

        args.extend([
            "-i".to_string(),
            self.input_url.clone(),
            "-t".to_string(),
            self.duration_secs.to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-an".to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.hls_time_secs.to_string(),
            "-hls_list_size".to_string(),
            "0".to_string(),
            "-hls_segment_filename".to_string(),
            self.paths.chunk_template.to_string_lossy().into_owned(),
            self.paths.playlist.to_string_lossy().into_owned(),
        ]);
        args
    }
}

fn is_rtsp(url: &str) -> bool {
    url.starts_with("rtsp://") || url.starts_with("rtsps://")
}

/// Something that can execute an [`Invocation`].
#[async_trait]
pub trait CaptureRunner: Send + Sync {
    /// Run the invocation to completion.
    ///
    /// `Ok` means the tool stopped on its own with a success status.  Any
    /// failure to start, crash or non-zero exit is an `Err`; callers do not
    /// distinguish between them.  Dropping the future stops the tool.
    async fn run(&self, invocation: &Invocation) -> Result<()>;
}

/// Runs invocations with a real ffmpeg binary.
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl FfmpegRunner {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl CaptureRunner for FfmpegRunner {
    async fn run(&self, invocation: &Invocation) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!("Failed to spawn {} for camera {}", self.binary.display(), invocation.camera)
        })?;

        // Drain stderr so the pipe never fills up and blocks ffmpeg.
        if let Some(stderr) = child.stderr.take() {
            let camera = invocation.camera.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.is_empty() {
                        warn!("[ffmpeg {camera}] {line}");
                    }
                }
                debug!("ffmpeg stderr stream ended for {camera}");
            });
        }

        let status = child.wait().await.context("Cannot wait for ffmpeg")?;
        if status.success() {
            Ok(())
        } else {
            anyhow::bail!("ffmpeg exited with {status}")
        }
    }
}

// ── locating the binary ──────────────────────────────────────────────────

/// Resolve the ffmpeg binary once at startup.
///
/// A configured binary wins if `<bin> -version` succeeds; otherwise `PATH`
/// is searched.  Not finding one is fatal for the caller.
pub fn resolve_ffmpeg(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(bin) = configured {
        match std::process::Command::new(bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => {
                info!("Using configured ffmpeg {}", bin.display());
                return Ok(bin.to_path_buf());
            }
            Ok(status) => warn!(
                "Configured ffmpeg {} failed `-version` ({status}), searching PATH",
                bin.display()
            ),
            Err(e) => warn!(
                "Configured ffmpeg {} cannot be run ({e}), searching PATH",
                bin.display()
            ),
        }
    }

    let path = std::env::var_os("PATH").unwrap_or_default();
    let found = find_executable("ffmpeg", std::env::split_paths(&path))
        .context("ffmpeg not found in PATH; install it or set ffmpeg_bin")?;
    info!("Using ffmpeg {}", found.display());
    Ok(found)
}

/// First `dir/name` among `dirs` that is an executable file.
fn find_executable(name: &str, dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    dirs.into_iter()
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
