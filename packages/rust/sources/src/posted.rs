//! Posting-time parsing for absolute and relative listing timestamps.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+|an?|one)\s*(minute|min|hour|hr|day|week|month)s?\s+ago\b")
        .expect("valid relative-time regex")
});

/// Parse a posting timestamp. Returns `None` when the text is not understood.
///
/// Accepts RFC 3339, `2024-05-01T10:00:00-0500`, `2024-05-01 10:00`,
/// `2024-05-01`, `05/01/2024`, `May 1, 2024`, and relative forms such as
/// "just now", "yesterday", "3 hours ago", or "a week ago".
pub fn parse_posted(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%b %d, %Y", "%B %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(t, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
        }
    }

    parse_relative(t, now)
}

fn parse_relative(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = text.to_lowercase();
    if lower.contains("just now") || lower.contains("moments ago") {
        return Some(now);
    }
    if lower.contains("yesterday") {
        return now.checked_sub_signed(TimeDelta::days(1));
    }
    if lower == "today" {
        return Some(now);
    }

    let caps = RELATIVE_RE.captures(&lower)?;
    let amount: i64 = match &caps[1] {
        "a" | "an" | "one" => 1,
        n => n.parse().ok()?,
    };
    // Listing text is untrusted; out-of-range amounts are unparseable.
    let delta = match &caps[2] {
        "minute" | "min" => TimeDelta::try_minutes(amount),
        "hour" | "hr" => TimeDelta::try_hours(amount),
        "day" => TimeDelta::try_days(amount),
        "week" => TimeDelta::try_weeks(amount),
        "month" => amount.checked_mul(30).and_then(TimeDelta::try_days),
        _ => None,
    }?;
    now.checked_sub_signed(delta)
}
