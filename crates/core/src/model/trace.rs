use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};
use crate::model::span::SpanRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub trace_id: TraceId,
    pub spans: Vec<SpanRecord>,
}

impl Trace {
    /// Spans without a parent, plus spans whose parent is not in this trace.
    pub fn roots(&self) -> impl Iterator<Item = &SpanRecord> {
        self.spans.iter().filter(|s| match s.parent_span_id {
            None => true,
            Some(parent) => !self.spans.iter().any(|p| p.span_id == parent),
        })
    }

    pub fn children(&self, span_id: SpanId) -> impl Iterator<Item = &SpanRecord> {
        self.spans
            .iter()
            .filter(move |s| s.parent_span_id == Some(span_id))
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.spans.iter().map(|s| s.timestamp).min()
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.spans.iter().map(SpanRecord::end_timestamp).max()
    }

    pub fn error_count(&self) -> usize {
        self.spans.iter().filter(|s| s.is_error()).count()
    }
}

/// Service-to-service call edge. Never populated; the dependency endpoint
/// exists so callers get an empty graph instead of an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyLink {
    pub parent: String,
    pub child: String,
    pub call_count: u64,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::model::span::Attributes;

    fn span(id: u64, parent: Option<u64>, offset_ms: i64) -> SpanRecord {
        SpanRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
                + chrono::TimeDelta::milliseconds(offset_ms),
            trace_id: TraceId::new(0, 7),
            span_id: SpanId::new(id),
            parent_span_id: parent.map(SpanId::new),
            trace_state: String::new(),
            operation_name: format!("op-{id}"),
            span_kind: "internal".into(),
            service_name: "api".into(),
            resource_attributes: Attributes::new(),
            scope_name: String::new(),
            scope_version: String::new(),
            attributes: Attributes::new(),
            duration_ns: 1_000_000,
            status_code: "STATUS_CODE_UNSET".into(),
            status_message: String::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn links_children_to_parents() {
        let trace = Trace {
            trace_id: TraceId::new(0, 7),
            spans: vec![span(1, None, 0), span(2, Some(1), 5), span(3, Some(1), 9)],
        };
        let roots = trace.roots().map(|s| s.span_id).collect::<Vec<_>>();
        assert_eq!(roots, vec![SpanId::new(1)]);
        let children = trace
            .children(SpanId::new(1))
            .map(|s| s.span_id)
            .collect::<Vec<_>>();
        assert_eq!(children, vec![SpanId::new(2), SpanId::new(3)]);
        assert_eq!(
            trace.end().unwrap() - trace.start().unwrap(),
            chrono::TimeDelta::milliseconds(10)
        );
    }

    #[test]
    fn orphaned_spans_count_as_roots() {
        let trace = Trace {
            trace_id: TraceId::new(0, 7),
            spans: vec![span(4, Some(99), 0)],
        };
        assert_eq!(trace.roots().count(), 1);
    }
}
