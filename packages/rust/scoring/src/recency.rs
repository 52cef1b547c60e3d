//! Decay-bucketed recency scoring.
//!
//! Relative strings like "2 hours ago" are resolved by the source adapters;
//! this module only sees absolute timestamps.

use chrono::{DateTime, Utc};

/// Score for listings with no usable posting time.
pub const UNKNOWN_AGE_SCORE: u8 = 1;

/// Upper bound (inclusive, hours) and score of each bucket, newest first.
const BUCKETS: [(f64, u8); 4] = [(12.0, 10), (48.0, 8), (168.0, 6), (720.0, 3)];

/// Score a posting by its age in hours. Future timestamps count as age zero.
pub fn score_age_hours(hours: f64) -> u8 {
    let hours = if hours.is_nan() { f64::INFINITY } else { hours.max(0.0) };
    BUCKETS
        .iter()
        .find(|(limit, _)| hours <= *limit)
        .map(|(_, score)| *score)
        .unwrap_or(UNKNOWN_AGE_SCORE)
}

/// Score a posting timestamp relative to `now`.
pub fn recency_score(posted_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u8 {
    match posted_at {
        Some(ts) => {
            let minutes = (now - ts).num_minutes();
            score_age_hours(minutes as f64 / 60.0)
        }
        None => UNKNOWN_AGE_SCORE,
    }
}
