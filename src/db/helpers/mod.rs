use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{JobKind, SessionState};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

/// Fixed-width UTC timestamps so that text comparison in SQL matches time order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_optional_datetime(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn parse_state(value: &str) -> Result<SessionState> {
    SessionState::parse(value).ok_or_else(|| anyhow!("unknown session state {value}"))
}

pub fn parse_job_kind(value: &str) -> Result<JobKind> {
    JobKind::parse(value).ok_or_else(|| anyhow!("unknown job kind {value}"))
}

/// `IN (...)` list literal for a fixed set of states.
pub fn state_list(states: &[SessionState]) -> String {
    states
        .iter()
        .map(|state| format!("'{}'", state.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetimes_round_trip_at_microsecond_precision() {
        let now = Utc::now();
        let parsed = parse_datetime(&format_datetime(&now), "now").unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn state_list_quotes_each_state() {
        assert_eq!(
            state_list(&SessionState::ACTIVE),
            "'Starting', 'Recording', 'Paused'"
        );
    }
}
