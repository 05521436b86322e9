//! Days-until-close computation for open opportunities.
//!
//! The portal's own "days left" value is unreliable close to the deadline,
//! so it is always recomputed from the close timestamp.

use chrono::{Local, NaiveDateTime};

/// Timestamp format of `DateClose` in the feed payloads.
pub const CLOSE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Whole days left until `close_date`, measured from local now.
pub fn days_remaining(close_date: &str) -> i64 {
    days_remaining_at(close_date, Local::now().naive_local())
}

/// Whole days between `now` and `close_date`.
///
/// Returns 0 if the text does not parse or the deadline is not after `now`.
pub fn days_remaining_at(close_date: &str, now: NaiveDateTime) -> i64 {
    let Ok(deadline) = NaiveDateTime::parse_from_str(close_date.trim(), CLOSE_DATE_FORMAT) else {
        return 0;
    };
    if deadline <= now {
        return 0;
    }
    (deadline - now).num_days()
}
