use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{Result, TraceHouseError};

/// Accepts an RFC3339 timestamp or a humantime duration meaning "that long ago".
pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - TimeDelta::from_std(duration).map_err(|e| {
                TraceHouseError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(TraceHouseError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| TraceHouseError::Parse(format!("invalid duration {input}: {e}")))
}

/// Duration as signed nanoseconds, the unit of the span table's `Duration` column.
pub fn duration_to_nanos(duration: Duration) -> Result<i64> {
    i64::try_from(duration.as_nanos())
        .map_err(|_| TraceHouseError::Parse(format!("duration {duration:?} is too large")))
}

/// Unix microseconds, as used by the HTTP API's `start`/`end` parameters.
pub fn from_unix_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| TraceHouseError::Parse(format!("timestamp {micros}us is out of range")))
}
