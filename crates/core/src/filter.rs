use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceHouseError};

static UNESCAPED_WILDCARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^\\])%").expect("static wildcard pattern"));

/// How a tag filter value is matched against a span attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagMatch {
    /// `~pattern`: store-native regular expression.
    Regex(String),
    /// Contains an unescaped `%`: `LIKE` pattern.
    Wildcard(String),
    /// Exact equality, with `\%` unescaped to `%`.
    Exact(String),
}

impl TagMatch {
    pub fn classify(value: &str) -> Self {
        if let Some(pattern) = value.strip_prefix('~') {
            return Self::Regex(pattern.to_string());
        }
        if UNESCAPED_WILDCARD.is_match(value) {
            return Self::Wildcard(value.to_string());
        }
        Self::Exact(value.replace("\\%", "%"))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Self::Regex(_) => "MATCH",
            Self::Wildcard(_) => "LIKE",
            Self::Exact(_) => "EQUAL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parses `key=value`. Only the first `=` splits, so values may contain `=`.
    pub fn parse(input: &str) -> Result<Self> {
        let (key, value) = input
            .split_once('=')
            .ok_or_else(|| TraceHouseError::Parse(format!("invalid tag filter: {input}")))?;

        if key.trim().is_empty() {
            return Err(TraceHouseError::Parse(format!("invalid tag filter: {input}")));
        }

        Ok(Self::new(key.trim(), value))
    }

    pub fn matcher(&self) -> TagMatch {
        TagMatch::classify(&self.value)
    }
}

/// Bounds on span start time for a search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchWindow {
    pub start_min: Option<DateTime<Utc>>,
    pub start_max: Option<DateTime<Utc>>,
}

impl SearchWindow {
    pub fn new(start_min: DateTime<Utc>, start_max: Option<DateTime<Utc>>) -> Self {
        Self {
            start_min: Some(start_min),
            start_max,
        }
    }

    pub fn since(start_min: DateTime<Utc>) -> Self {
        Self::new(start_min, None)
    }
}

/// Half-open interval `[start, end)` scanned by one store query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn classifies_tag_values() {
        assert_eq!(TagMatch::classify("~foo.*"), TagMatch::Regex("foo.*".into()));
        assert_eq!(TagMatch::classify("50%"), TagMatch::Wildcard("50%".into()));
        assert_eq!(TagMatch::classify("50\\%"), TagMatch::Exact("50%".into()));
        assert_eq!(TagMatch::classify("%"), TagMatch::Wildcard("%".into()));
        assert_eq!(TagMatch::classify("plain"), TagMatch::Exact("plain".into()));
    }

    #[test]
    fn regex_marker_wins_over_wildcard() {
        assert_eq!(TagMatch::classify("~50%"), TagMatch::Regex("50%".into()));
        assert_eq!(TagMatch::classify("~~x"), TagMatch::Regex("~x".into()));
    }

    #[test]
    fn mixed_escapes_stay_wildcard() {
        assert_eq!(
            TagMatch::classify("\\%off %"),
            TagMatch::Wildcard("\\%off %".into())
        );
    }

    #[test]
    fn tag_filter_parse() {
        let f = TagFilter::parse("http.url=/a?b=c").unwrap();
        assert_eq!(f.key, "http.url");
        assert_eq!(f.value, "/a?b=c");
        assert!(TagFilter::parse("novalue").is_err());
        assert!(TagFilter::parse("=x").is_err());
    }

    #[test]
    fn time_range_emptiness() {
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let t1 = t0 + TimeDelta::minutes(5);
        assert!(!TimeRange::new(t0, t1).is_empty());
        assert!(TimeRange::new(t0, t0).is_empty());
        assert!(TimeRange::new(t1, t0).is_empty());
        assert!(TimeRange::new(t0, t1).contains(t0));
        assert!(!TimeRange::new(t0, t1).contains(t1));
    }
}
