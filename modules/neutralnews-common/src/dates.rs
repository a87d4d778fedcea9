//! RSS publication-date parsing.
//!
//! Feeds disagree on date formats. RFC 2822 is the norm, but outlets also emit
//! ISO-8601 with and without offsets, dates without a weekday, and zone names
//! such as `GMT`. Naive timestamps are read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

const OFFSET_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

const ZONE_NAMES: &[&str] = &[" GMT", " UTC", " UT", " Z"];

/// Parse a feed publication date. Returns `None` for anything unrecognised.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let cleaned = normalize_zone_name(raw);

    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&cleaned, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn normalize_zone_name(raw: &str) -> String {
    if raw.contains("+0000") || raw.contains("-0000") {
        return raw.to_string();
    }
    for zone in ZONE_NAMES {
        if let Some(stripped) = raw.strip_suffix(zone) {
            return format!("{stripped} +0000");
        }
    }
    raw.to_string()
}
