//! On-disk index – the directory layout shared by the recorder (writer)
//! and the query server (reader):
//!
//! ```text
//! <storage_dir>/<camera>/<YYYY-MM-DD>/<HH-HH>/<stamp>.m3u8
//! <storage_dir>/<camera>/<YYYY-MM-DD>/<HH-HH>/<stamp>.NNNN.ts
//! ```
//!
//! `stamp` is the local start time of the capture invocation that wrote
//! the playlist (`2024-03-10_06-00-00`).  Chunk numbers are four digits,
//! zero-based and restart at zero with every invocation, so one block may
//! hold several playlists with overlapping chunk numbers.
//!
//! The reader takes no locks.  Blocks that are still being written are
//! reported with whatever chunk files exist at the time of the call, and
//! anything under the root that does not follow the layout is skipped.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::{debug, warn};

use crate::block::BlockLabel;
use crate::protocol::{AvailableDate, BlockInfo, PlaylistChunks, SegmentInfo};
use crate::retention::DATE_FORMAT;

/// `strftime` format of a playlist stamp.
pub const STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
pub const PLAYLIST_EXT: &str = "m3u8";
pub const CHUNK_EXT: &str = "ts";

/// Playlist stamp for an invocation starting at `start`.
pub fn playlist_stamp(start: NaiveDateTime) -> String {
    start.format(STAMP_FORMAT).to_string()
}

pub fn parse_playlist_stamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()
}

/// Parse a date directory name.  Only the canonical zero-padded form is
/// accepted, since retention compares these names as strings.
pub fn parse_date_dir(name: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(name, DATE_FORMAT).ok()?;
    (date.format(DATE_FORMAT).to_string() == name).then_some(date)
}

/// Split a chunk file name into its playlist stamp and chunk number.
///
/// `2024-03-10_06-00-00.0007.ts` → `("2024-03-10_06-00-00", 7)`.  Chunks
/// without a stamp (`0007.ts`) yield an empty stamp.
pub fn parse_chunk_name(name: &str) -> Option<(&str, u32)> {
    let stem = name.strip_suffix(CHUNK_EXT)?.strip_suffix('.')?;
    let (stamp, digits) = stem.rsplit_once('.').unwrap_or(("", stem));
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((stamp, digits.parse().ok()?))
}

/// Output paths of one capture invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationPaths {
    pub playlist: PathBuf,
    /// ffmpeg `-hls_segment_filename` template (`<stamp>.%04d.ts`).
    pub chunk_template: PathBuf,
}

/// Root of the on-disk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn camera_dir(&self, camera: &str) -> PathBuf {
        self.root.join(camera)
    }

    pub fn date_dir(&self, camera: &str, date: NaiveDate) -> PathBuf {
        self.camera_dir(camera)
            .join(date.format(DATE_FORMAT).to_string())
    }

    pub fn block_dir(&self, camera: &str, date: NaiveDate, label: BlockLabel) -> PathBuf {
        self.date_dir(camera, date).join(label.to_string())
    }

    /// Create the block directory (and its parents) if needed.
    pub fn ensure_block_dir(
        &self,
        camera: &str,
        date: NaiveDate,
        label: BlockLabel,
    ) -> Result<PathBuf> {
        let dir = self.block_dir(camera, date, label);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create block directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Playlist and chunk template for an invocation stamped `stamp`.
    pub fn invocation_paths(block_dir: &Path, stamp: &str) -> InvocationPaths {
        InvocationPaths {
            playlist: block_dir.join(format!("{stamp}.{PLAYLIST_EXT}")),
            chunk_template: block_dir.join(format!("{stamp}.%04d.{CHUNK_EXT}")),
        }
    }

    /// Whether any file of an invocation stamped `stamp` already exists in
    /// `block_dir`.  A missing directory holds nothing.
    pub fn stamp_in_use(block_dir: &Path, stamp: &str) -> bool {
        let prefix = format!("{stamp}.");
        let Ok(entries) = fs::read_dir(block_dir) else {
            return false;
        };
        entries
            .flatten()
            .any(|e| e.file_name().to_str().is_some_and(|n| n.starts_with(&prefix)))
    }

    // ── read side ────────────────────────────────────────────────────────

    /// Every date of `camera` with its blocks and segments, newest date first.
    /// A camera that has not recorded anything yet has no dates.
    pub fn list_available(&self, camera: &str) -> Vec<AvailableDate> {
        let camera_dir = self.camera_dir(camera);
        let Ok(entries) = fs::read_dir(&camera_dir) else {
            return Vec::new();
        };

        let mut dates: Vec<AvailableDate> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| {
                let date = parse_date_dir(e.file_name().to_str()?)?;
                Some(AvailableDate {
                    date,
                    blocks: read_blocks(&e.path()),
                })
            })
            .collect();

        dates.sort_by(|a, b| b.date.cmp(&a.date));
        dates
    }

    /// Chunk numbers on disk for one block, grouped per playlist.
    ///
    /// Each playlist keeps its own numbering; nothing is merged or
    /// renumbered across invocations.
    pub fn list_chunk_indices(
        &self,
        camera: &str,
        date: NaiveDate,
        label: BlockLabel,
    ) -> Vec<PlaylistChunks> {
        let dir = self.block_dir(camera, date, label);
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };

        let mut by_playlist: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((stamp, n)) = parse_chunk_name(name) {
                if stamp.is_empty() || parse_playlist_stamp(stamp).is_some() {
                    by_playlist.entry(stamp.to_string()).or_default().push(n);
                }
            } else if let Some(stamp) = playlist_stem(name) {
                if parse_playlist_stamp(stamp).is_some() {
                    by_playlist.entry(stamp.to_string()).or_default();
                }
            }
        }

        by_playlist
            .into_iter()
            .map(|(playlist, mut chunks)| {
                chunks.sort_unstable();
                PlaylistChunks { playlist, chunks }
            })
            .collect()
    }
}

fn playlist_stem(name: &str) -> Option<&str> {
    name.strip_suffix(PLAYLIST_EXT)?.strip_suffix('.')
}

fn read_blocks(date_dir: &Path) -> Vec<BlockInfo> {
    let entries = match fs::read_dir(date_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot list {}: {e}", date_dir.display());
            return Vec::new();
        }
    };

    let mut blocks: Vec<(BlockLabel, BlockInfo)> = Vec::new();
    for entry in entries.flatten() {
        if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        let Some(label) = name.to_str().and_then(|n| n.parse::<BlockLabel>().ok()) else {
            continue;
        };
        match read_segments(&entry.path()) {
            Ok(segments) => blocks.push((
                label,
                BlockInfo {
                    hour_range: label.to_string(),
                    start: label.start_hour(),
                    end: label.end_hour(),
                    segments,
                },
            )),
            Err(e) => warn!("Skipping unreadable block {}: {e}", entry.path().display()),
        }
    }

    blocks.sort_by_key(|(label, _)| *label);
    blocks.into_iter().map(|(_, block)| block).collect()
}

fn read_segments(block_dir: &Path) -> std::io::Result<Vec<SegmentInfo>> {
    let mut playlists: Vec<(NaiveDateTime, String, PathBuf)> = Vec::new();
    let mut chunk_counts: HashMap<String, usize> = HashMap::new();

    for entry in fs::read_dir(block_dir)?.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((stamp, _)) = parse_chunk_name(name) {
            *chunk_counts.entry(stamp.to_string()).or_default() += 1;
        } else if let Some(start) = playlist_stem(name).and_then(parse_playlist_stamp) {
            playlists.push((start, name.to_string(), entry.path()));
        }
    }

    playlists.sort_by_key(|(start, _, _)| *start);
    Ok(playlists
        .into_iter()
        .map(|(start, playlist, path)| {
            let stamp = playlist_stamp(start);
            SegmentInfo {
                end: playlist_duration(&path).map(|d| start + d),
                chunk_count: chunk_counts.get(&stamp).copied().unwrap_or(0),
                playlist,
                start,
            }
        })
        .collect())
}

/// Total media duration listed in an HLS playlist.
fn playlist_duration(path: &Path) -> Option<Duration> {
    let bytes = fs::read(path).ok()?;
    match m3u8_rs::parse_playlist_res(&bytes) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(pl)) => {
            let secs: f64 = pl.segments.iter().map(|s| f64::from(s.duration)).sum();
            Some(Duration::milliseconds((secs * 1000.0).round() as i64))
        }
        Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => None,
        Err(_) => {
            debug!("Cannot parse playlist {}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn stamp(s: &str) -> NaiveDateTime {
        parse_playlist_stamp(s).unwrap()
    }

    fn playlist(durations: &[f32], stamp: &str) -> String {
        let mut text = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n",
        );
        for (i, d) in durations.iter().enumerate() {
            text.push_str(&format!("#EXTINF:{d:.6},\n{stamp}.{i:04}.ts\n"));
        }
        text
    }

    /// Write one invocation's playlist plus one chunk file per duration.
    fn write_invocation(dir: &Path, stamp: &str, durations: &[f32]) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(format!("{stamp}.m3u8")), playlist(durations, stamp)).unwrap();
        for i in 0..durations.len() {
            fs::write(dir.join(format!("{stamp}.{i:04}.ts")), b"ts").unwrap();
        }
    }

    #[test]
    fn test_paths() {
        let layout = StorageLayout::new("/srv/cctv");
        let label: BlockLabel = "06-12".parse().unwrap();
        let dir = layout.block_dir("front", date("2024-03-10"), label);
        assert_eq!(dir, PathBuf::from("/srv/cctv/front/2024-03-10/06-12"));

        let paths = StorageLayout::invocation_paths(&dir, "2024-03-10_07-15-00");
        assert_eq!(
            paths.playlist,
            PathBuf::from("/srv/cctv/front/2024-03-10/06-12/2024-03-10_07-15-00.m3u8")
        );
        assert_eq!(
            paths.chunk_template,
            PathBuf::from("/srv/cctv/front/2024-03-10/06-12/2024-03-10_07-15-00.%04d.ts")
        );
    }

    #[test]
    fn test_stamp_round_trip() {
        let t = stamp("2024-03-10_07-15-00");
        assert_eq!(playlist_stamp(t), "2024-03-10_07-15-00");
        assert!(parse_playlist_stamp("2024-03-10 07:15:00").is_none());
    }

    #[test]
    fn test_parse_chunk_name() {
        assert_eq!(
            parse_chunk_name("2024-03-10_06-00-00.0007.ts"),
            Some(("2024-03-10_06-00-00", 7))
        );
        assert_eq!(parse_chunk_name("0012.ts"), Some(("", 12)));
        assert_eq!(parse_chunk_name("2024-03-10_06-00-00.m3u8"), None);
        assert_eq!(parse_chunk_name("a.b.ts"), None);
        assert_eq!(parse_chunk_name(".ts"), None);
        assert_eq!(parse_chunk_name("notes.txt"), None);
    }

    #[test]
    fn test_parse_date_dir_is_strict() {
        assert_eq!(parse_date_dir("2024-03-10"), Some(date("2024-03-10")));
        assert_eq!(parse_date_dir("2024-3-10"), None);
        assert_eq!(parse_date_dir("2024-02-30"), None);
        assert_eq!(parse_date_dir("lost+found"), None);
    }

    #[test]
    fn test_chunk_indices_are_per_playlist() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let label: BlockLabel = "06-12".parse().unwrap();
        let dir = layout.block_dir("front", date("2024-03-10"), label);

        // first invocation failed after five chunks, the restart wrote three
        write_invocation(&dir, "2024-03-10_06-00-00", &[10.0; 5]);
        write_invocation(&dir, "2024-03-10_06-51-12", &[10.0; 3]);

        let listing = layout.list_chunk_indices("front", date("2024-03-10"), label);
        assert_eq!(
            listing,
            vec![
                PlaylistChunks {
                    playlist: "2024-03-10_06-00-00".into(),
                    chunks: vec![0, 1, 2, 3, 4],
                },
                PlaylistChunks {
                    playlist: "2024-03-10_06-51-12".into(),
                    chunks: vec![0, 1, 2],
                },
            ]
        );
    }

    #[test]
    fn test_chunk_indices_skip_malformed_names() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let label: BlockLabel = "06-12".parse().unwrap();
        let dir = layout.block_dir("front", date("2024-03-10"), label);

        write_invocation(&dir, "2024-03-10_06-00-00", &[10.0; 2]);
        fs::write(dir.join("notes.m3u8"), b"").unwrap();
        fs::write(dir.join("backup.0003.ts"), b"ts").unwrap();
        fs::write(dir.join("0001.ts"), b"ts").unwrap();

        let listing = layout.list_chunk_indices("front", date("2024-03-10"), label);
        let playlists: Vec<&str> = listing.iter().map(|p| p.playlist.as_str()).collect();
        assert_eq!(playlists, ["", "2024-03-10_06-00-00"]);
        assert_eq!(listing[0].chunks, vec![1]);
        assert_eq!(listing[1].chunks, vec![0, 1]);
    }

    #[test]
    fn test_stamp_in_use() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("06-12");
        assert!(!StorageLayout::stamp_in_use(&dir, "2024-03-10_06-00-00"));

        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2024-03-10_06-00-00.0000.ts"), b"ts").unwrap();
        assert!(StorageLayout::stamp_in_use(&dir, "2024-03-10_06-00-00"));
        assert!(!StorageLayout::stamp_in_use(&dir, "2024-03-10_06-00-01"));
    }

    #[test]
    fn test_chunk_indices_missing_block() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let label: BlockLabel = "00-06".parse().unwrap();
        assert!(layout.list_chunk_indices("front", date("2024-03-10"), label).is_empty());
    }

    #[test]
    fn test_list_available() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        let cam = layout.camera_dir("front");

        write_invocation(&cam.join("2024-03-09/18-24"), "2024-03-09_18-00-00", &[10.0, 10.0, 4.5]);
        write_invocation(&cam.join("2024-03-10/06-12"), "2024-03-10_06-51-12", &[10.0]);
        write_invocation(&cam.join("2024-03-10/06-12"), "2024-03-10_06-00-00", &[10.0, 10.0]);
        write_invocation(&cam.join("2024-03-10/00-06"), "2024-03-10_00-00-00", &[10.0]);

        // in-progress invocation: chunks on disk, playlist not written yet
        let dir = cam.join("2024-03-10/12-18");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2024-03-10_12-00-00.m3u8"), b"").unwrap();
        fs::write(dir.join("2024-03-10_12-00-00.0000.ts"), b"ts").unwrap();

        // foreign entries are ignored
        fs::create_dir_all(cam.join("thumbnails")).unwrap();
        fs::create_dir_all(cam.join("2024-03-10/misc")).unwrap();
        fs::write(cam.join("2024-03-08"), b"not a directory").unwrap();

        let avail = layout.list_available("front");
        let dates: Vec<String> = avail.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(dates, ["2024-03-10", "2024-03-09"]);

        let today = &avail[0];
        let ranges: Vec<&str> = today.blocks.iter().map(|b| b.hour_range.as_str()).collect();
        assert_eq!(ranges, ["00-06", "06-12", "12-18"]);

        let morning = &today.blocks[1];
        assert_eq!((morning.start, morning.end), (6, 12));
        assert_eq!(morning.segments.len(), 2);
        assert_eq!(morning.segments[0].playlist, "2024-03-10_06-00-00.m3u8");
        assert_eq!(morning.segments[0].chunk_count, 2);
        assert_eq!(morning.segments[0].end, Some(stamp("2024-03-10_06-00-20")));
        assert_eq!(morning.segments[1].start, stamp("2024-03-10_06-51-12"));
        assert_eq!(morning.segments[1].chunk_count, 1);

        let recording = &today.blocks[2].segments[0];
        assert_eq!(recording.chunk_count, 1);
        assert_eq!(recording.end, None);

        let evening = &avail[1].blocks[0].segments[0];
        assert_eq!(evening.chunk_count, 3);
        assert_eq!(
            evening.end,
            Some(stamp("2024-03-09_18-00-00") + Duration::milliseconds(24_500))
        );
    }

    #[test]
    fn test_list_available_unknown_camera() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path());
        assert!(layout.list_available("nobody").is_empty());
    }
}
