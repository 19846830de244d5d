//! Block clock – maps wall-clock time onto fixed, midnight-aligned
//! recording windows.
//!
//! A day is tiled by `24 / BLOCK_HOURS` blocks.  Nothing about a block is
//! persisted; the recorder and the readers re-derive it from the clock or
//! from the `HH-HH` directory name.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Length of one recording block in hours.  Must divide 24.
pub const BLOCK_HOURS: u32 = 6;

/// Number of blocks that tile one calendar day.
pub const BLOCKS_PER_DAY: u32 = 24 / BLOCK_HOURS;

/// Length of one recording block.
pub fn block_length() -> Duration {
    Duration::hours(i64::from(BLOCK_HOURS))
}

/// Start of the block enclosing `now`: truncate to midnight, then floor the
/// hour to a multiple of [`BLOCK_HOURS`].
pub fn block_start(now: NaiveDateTime) -> NaiveDateTime {
    let hour = now.hour() / BLOCK_HOURS * BLOCK_HOURS;
    now.date().and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour))
}

// ── block label ──────────────────────────────────────────────────────────

/// Errors from parsing a block directory name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockLabelError {
    #[error("block label must look like HH-HH, got {0:?}")]
    Malformed(String),
    #[error("block hours out of range: {start:02}-{end:02}")]
    OutOfRange { start: u32, end: u32 },
}

/// The `HH-HH` hour range naming a block directory, e.g. `06-12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockLabel {
    start_hour: u32,
    end_hour: u32,
}

impl BlockLabel {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, BlockLabelError> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(BlockLabelError::OutOfRange {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    /// Label for the block starting at `start` (as returned by [`block_start`]).
    pub fn from_block_start(start: NaiveDateTime) -> Self {
        let start_hour = start.hour();
        Self {
            start_hour,
            end_hour: start_hour + BLOCK_HOURS,
        }
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }
}

impl fmt::Display for BlockLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.start_hour, self.end_hour)
    }
}

impl FromStr for BlockLabel {
    type Err = BlockLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BlockLabelError::Malformed(s.to_string());
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b'-' {
            return Err(malformed());
        }
        let two_digits = |b: &[u8]| -> Option<u32> {
            if b.iter().all(u8::is_ascii_digit) {
                Some(u32::from(b[0] - b'0') * 10 + u32::from(b[1] - b'0'))
            } else {
                None
            }
        };
        let start = two_digits(&bytes[..2]).ok_or_else(malformed)?;
        let end = two_digits(&bytes[3..]).ok_or_else(malformed)?;
        Self::new(start, end)
    }
}

// ── recording window ─────────────────────────────────────────────────────

/// The block enclosing a given instant, plus how much of it is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// `end - now`.  Can only be non-positive if the clock misbehaves.
    pub remaining: Duration,
}

impl RecordingWindow {
    pub fn at(now: NaiveDateTime) -> Self {
        let start = block_start(now);
        let end = start + block_length();
        Self {
            start,
            end,
            remaining: end - now,
        }
    }

    /// Calendar date the block belongs to.
    pub fn date(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn label(&self) -> BlockLabel {
        BlockLabel::from_block_start(self.start)
    }

    /// Whole seconds left in the block, zero when nothing usable is left.
    pub fn remaining_secs(&self) -> u64 {
        u64::try_from(self.remaining.num_seconds()).unwrap_or(0)
    }
}
