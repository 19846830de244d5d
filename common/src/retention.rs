//! Retention arithmetic.
//!
//! Date directories are named `YYYY-MM-DD`, a fixed-width, zero-padded
//! format whose string order matches calendar order, so expiry is a plain
//! string comparison against the cutoff date.

use chrono::{Days, NaiveDate};

/// Directory-name format of a date partition.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Oldest date still kept when `today` is the current date and `days` is the
/// retention horizon.  Calendar arithmetic, so DST changes do not matter.
pub fn cutoff_date(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// `true` if the date directory called `dir_name` sorts strictly before
/// `cutoff` and is therefore due for deletion.
pub fn is_expired(dir_name: &str, cutoff: NaiveDate) -> bool {
    dir_name < cutoff.format(DATE_FORMAT).to_string().as_str()
}
