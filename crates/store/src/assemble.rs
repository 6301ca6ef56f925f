use std::collections::HashMap;

use tracehouse_core::ids::TraceId;
use tracehouse_core::model::span::SpanRecord;
use tracehouse_core::model::trace::Trace;

/// Groups span records into traces, emitted in `requested` order.
///
/// Ids requested more than once are emitted once, ids without records are
/// dropped, and records of traces nobody asked for are discarded. Spans keep
/// their row order within a trace.
pub fn assemble_traces(requested: &[TraceId], records: Vec<SpanRecord>) -> Vec<Trace> {
    let mut by_trace: HashMap<TraceId, Vec<SpanRecord>> = HashMap::new();
    for record in records {
        by_trace.entry(record.trace_id).or_default().push(record);
    }

    requested
        .iter()
        .filter_map(|trace_id| {
            by_trace.remove(trace_id).map(|spans| Trace {
                trace_id: *trace_id,
                spans,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use tracehouse_core::ids::SpanId;
    use tracehouse_core::model::span::Attributes;

    use super::*;

    fn record(trace: u64, span: u64) -> SpanRecord {
        SpanRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            trace_id: TraceId::new(0, trace),
            span_id: SpanId::new(span),
            parent_span_id: None,
            trace_state: String::new(),
            operation_name: "op".into(),
            span_kind: String::new(),
            service_name: "svc".into(),
            resource_attributes: Attributes::new(),
            scope_name: String::new(),
            scope_version: String::new(),
            attributes: Attributes::new(),
            duration_ns: 1,
            status_code: String::new(),
            status_message: String::new(),
            events: Vec::new(),
        }
    }

    #[test]
    fn emits_in_requested_order_regardless_of_row_order() {
        let a = TraceId::new(0, 1);
        let b = TraceId::new(0, 2);
        let rows = vec![record(2, 20), record(1, 10), record(2, 21), record(1, 11)];

        let traces = assemble_traces(&[a, b], rows);
        assert_eq!(traces.iter().map(|t| t.trace_id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(
            traces[1].spans.iter().map(|s| s.span_id).collect::<Vec<_>>(),
            vec![SpanId::new(20), SpanId::new(21)]
        );
    }

    #[test]
    fn drops_missing_and_repeated_ids() {
        let a = TraceId::new(0, 1);
        let missing = TraceId::new(0, 9);
        let traces = assemble_traces(&[missing, a, a], vec![record(1, 10), record(5, 50)]);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].trace_id, a);
        assert_eq!(traces[0].spans.len(), 1);
    }

    #[test]
    fn every_span_belongs_to_its_trace() {
        let ids = [TraceId::new(0, 1), TraceId::new(0, 2)];
        let traces = assemble_traces(&ids, vec![record(1, 1), record(2, 2), record(1, 3)]);
        for trace in traces {
            assert!(trace.spans.iter().all(|s| s.trace_id == trace.trace_id));
        }
    }
}
