use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracehouse_core::error::{IdKind, Result, TraceHouseError};
use tracehouse_core::ids::{SpanId, TraceId};
use tracehouse_core::model::span::{Attributes, SpanEvent, SpanRecord};

/// One row of the span table, already coerced to Rust types by an adapter but
/// with identifiers still in their stored text form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpanRow {
    pub timestamp: DateTime<Utc>,
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: String,
    pub trace_state: String,
    pub span_name: String,
    pub span_kind: String,
    pub service_name: String,
    pub resource_attributes: Attributes,
    pub scope_name: String,
    pub scope_version: String,
    pub span_attributes: Attributes,
    pub duration: i64,
    pub status_code: String,
    pub status_message: String,
    pub event_timestamps: Vec<DateTime<Utc>>,
    pub event_names: Vec<String>,
    pub event_attributes: Vec<Attributes>,
}

/// Validates identifiers and zips the parallel event columns.
///
/// Event `i` takes the `i`th timestamp, name and attribute map. A missing
/// attribute map gives an event without attributes; a missing timestamp is a
/// decode error.
pub fn map_span_row(row: SpanRow) -> Result<SpanRecord> {
    let trace_id = TraceId::parse(&row.trace_id)?;
    let span_id = SpanId::parse(&row.span_id)?;
    let parent_span_id = if row.parent_span_id.is_empty() {
        None
    } else {
        Some(SpanId::parse_as(&row.parent_span_id, IdKind::ParentSpan)?)
    };

    if row.event_timestamps.len() < row.event_names.len() {
        return Err(TraceHouseError::Decode(format!(
            "span {}/{}: {} event names but only {} event timestamps",
            row.trace_id,
            row.span_id,
            row.event_names.len(),
            row.event_timestamps.len()
        )));
    }

    let mut attributes = row.event_attributes.into_iter();
    let events = row
        .event_names
        .into_iter()
        .zip(row.event_timestamps)
        .map(|(name, timestamp)| SpanEvent {
            timestamp,
            name,
            attributes: attributes.next().unwrap_or_default(),
        })
        .collect();

    Ok(SpanRecord {
        timestamp: row.timestamp,
        trace_id,
        span_id,
        parent_span_id,
        trace_state: row.trace_state,
        operation_name: row.span_name,
        span_kind: row.span_kind,
        service_name: row.service_name,
        resource_attributes: row.resource_attributes,
        scope_name: row.scope_name,
        scope_version: row.scope_version,
        attributes: row.span_attributes,
        duration_ns: row.duration,
        status_code: row.status_code,
        status_message: row.status_message,
        events,
    })
}

/// Maps a whole batch; the first bad row fails the batch.
pub fn map_span_rows(rows: Vec<SpanRow>) -> Result<Vec<SpanRecord>> {
    rows.into_iter().map(map_span_row).collect()
}
