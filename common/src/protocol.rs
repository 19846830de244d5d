//! HTTP protocol types served by the query server.  Everything here is a
//! read-side view of the on-disk index or of the configuration.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Health-check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

/// Public view of a configured camera.  The capture URL is deliberately
/// absent: it usually carries credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub name: String,
    pub color: Option<String>,
    /// Effective retention horizon in days.
    pub retention_days: u32,
    /// Whether a recording supervisor runs for this camera.
    pub recording: bool,
}

/// One date partition of a camera, with the blocks found under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableDate {
    pub date: NaiveDate,
    pub blocks: Vec<BlockInfo>,
}

/// One `HH-HH` block directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Directory name, e.g. `06-12`.
    pub hour_range: String,
    pub start: u32,
    pub end: u32,
    pub segments: Vec<SegmentInfo>,
}

/// One capture invocation inside a block: a playlist and its chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Playlist file name, e.g. `2024-03-10_06-00-00.m3u8`.
    pub playlist: String,
    /// Invocation start, taken from the playlist name.
    pub start: NaiveDateTime,
    /// Start plus the summed chunk durations; `None` while the playlist is
    /// unreadable (typically because ffmpeg is rewriting it).
    pub end: Option<NaiveDateTime>,
    /// Chunk files currently on disk for this playlist.
    pub chunk_count: usize,
}

/// Chunk numbers present on disk for one playlist of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistChunks {
    /// Playlist stamp the chunks belong to; empty for unprefixed chunks.
    pub playlist: String,
    /// Ascending chunk numbers.
    pub chunks: Vec<u32>,
}
