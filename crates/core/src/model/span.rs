use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};

pub type Attributes = BTreeMap<String, String>;

pub const STATUS_CODE_ERROR: &str = "STATUS_CODE_ERROR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEvent {
    pub timestamp: DateTime<Utc>,
    pub name: String,
    pub attributes: Attributes,
}

/// One span, decoded from a single row of the span table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub timestamp: DateTime<Utc>,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub trace_state: String,
    pub operation_name: String,
    pub span_kind: String,
    pub service_name: String,
    pub resource_attributes: Attributes,
    pub scope_name: String,
    pub scope_version: String,
    pub attributes: Attributes,
    pub duration_ns: i64,
    pub status_code: String,
    pub status_message: String,
    pub events: Vec<SpanEvent>,
}

impl SpanRecord {
    pub fn duration(&self) -> TimeDelta {
        TimeDelta::nanoseconds(self.duration_ns)
    }

    pub fn end_timestamp(&self) -> DateTime<Utc> {
        self.timestamp + self.duration()
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.status_code == STATUS_CODE_ERROR || self.status_code.eq_ignore_ascii_case("error")
    }

    /// Span attributes as key/value tags, with `error=true` appended for
    /// failed spans.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<Vec<_>>();
        if self.is_error() {
            tags.push(("error".to_string(), "true".to_string()));
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn span(status: &str) -> SpanRecord {
        SpanRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            trace_id: TraceId::new(0, 1),
            span_id: SpanId::new(2),
            parent_span_id: None,
            trace_state: String::new(),
            operation_name: "GET /orders".into(),
            span_kind: "server".into(),
            service_name: "api".into(),
            resource_attributes: Attributes::new(),
            scope_name: String::new(),
            scope_version: String::new(),
            attributes: Attributes::from([("http.method".to_string(), "GET".to_string())]),
            duration_ns: 1_500_000,
            status_code: status.into(),
            status_message: String::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn error_spans_carry_error_tag() {
        assert_eq!(span("STATUS_CODE_UNSET").tags().len(), 1);
        let tags = span(STATUS_CODE_ERROR).tags();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1], ("error".to_string(), "true".to_string()));
    }

    #[test]
    fn duration_is_nanoseconds() {
        let s = span("STATUS_CODE_OK");
        assert_eq!(s.duration(), TimeDelta::microseconds(1500));
        assert_eq!(s.end_timestamp() - s.timestamp, TimeDelta::nanoseconds(1_500_000));
    }
}
