/*!
 * Clock-ordered snapshot naming
 *
 * Managed snapshots carry their creation instant in their name, at minute
 * resolution: `<prefix>YYYY-MM-DD_HH:MM` (UTC). The format is fixed-width, so
 * ordinary string ordering matches chronological ordering for names sharing
 * a prefix. Two snapshots requested within the same minute get the same name.
 */

use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

/// chrono layout for the timestamp part of a managed name
pub const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d_%H:%M";

/// Regex fragment matching exactly one encoded timestamp
pub const TIMESTAMP_PATTERN: &str = r"[0-9]{4}-[0-9]{2}-[0-9]{2}_[0-9]{2}:[0-9]{2}";

/// Encode an instant as a bare timestamp (no prefix)
pub fn encode_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(TIMESTAMP_LAYOUT).to_string()
}

/// Decode a bare timestamp; `None` if the text is not exactly one timestamp
pub fn decode_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_LAYOUT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Truncate an instant to the resolution names can represent
pub fn truncate_to_minute(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(instant)
}

/// Test whether `name` belongs to the managed set described by `pattern`
pub fn is_managed(name: &str, pattern: &Regex) -> bool {
    pattern.is_match(name)
}

/// Naming scheme for one snapshot group
#[derive(Debug, Clone)]
pub struct SnapshotNaming {
    prefix: String,
    pattern: Regex,
}

impl SnapshotNaming {
    /// Build the scheme for names of the form `<prefix><timestamp>`
    pub fn new(prefix: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(
            "^{}{}$",
            regex::escape(prefix),
            TIMESTAMP_PATTERN
        ))?;

        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pattern(&self) -> &Regex {
        &self.pattern
    }

    /// Name for a snapshot taken at `instant`
    pub fn encode(&self, instant: DateTime<Utc>) -> String {
        format!("{}{}", self.prefix, encode_timestamp(instant))
    }

    /// Creation instant of a managed name, or `None` for foreign names
    pub fn decode(&self, name: &str) -> Option<DateTime<Utc>> {
        if !self.is_managed(name) {
            return None;
        }
        decode_timestamp(name.strip_prefix(self.prefix.as_str())?)
    }

    pub fn is_managed(&self, name: &str) -> bool {
        is_managed(name, &self.pattern)
    }
}
