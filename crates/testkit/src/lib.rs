use std::path::Path;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use duckdb::Connection;
use tracehouse_core::model::span::Attributes;
use tracehouse_store::DuckStore;
use tracehouse_store::row::SpanRow;
use tracehouse_store::schema::schema_sql;

pub const TRACE_ID_CLIENT: &str = "843bc5b94cbaa733844dfe41f33167ad";
pub const TRACE_ID_SERVER: &str = "373ee1ef9f1f5f2abc5d900ddc7e94ef";
pub const SERVICE_CLIENT: &str = "test-client";
pub const SERVICE_SERVER: &str = "test-server";
pub const PARENT_SPAN_NAME: &str = "parent-span";
pub const CHILD_SPAN_NAME: &str = "child-span";
pub const PARENT_SPAN_ID: &str = "a7d2aa025caa9cb8";
pub const CHILD_SPAN_ID: &str = "0d8fd33795ba49aa";

pub fn fixture_base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A parent span carrying two resource and two span attributes, and a child
/// span with none. Both last 3600ns.
pub fn sample_trace(trace_id: &str, service: &str, kind: &str, start: DateTime<Utc>) -> Vec<SpanRow> {
    vec![
        SpanRow {
            timestamp: start,
            trace_id: trace_id.to_string(),
            span_id: PARENT_SPAN_ID.to_string(),
            parent_span_id: String::new(),
            span_name: PARENT_SPAN_NAME.to_string(),
            span_kind: kind.to_string(),
            service_name: service.to_string(),
            resource_attributes: attrs(&[("resource-1", "value-1"), ("resource-2", "value-2")]),
            scope_name: service.to_string(),
            span_attributes: attrs(&[("attr-1", "value-1"), ("attr-2", "value-2")]),
            duration: 3600,
            status_code: "STATUS_CODE_UNSET".to_string(),
            ..SpanRow::default()
        },
        SpanRow {
            timestamp: start + TimeDelta::microseconds(500),
            trace_id: trace_id.to_string(),
            span_id: CHILD_SPAN_ID.to_string(),
            parent_span_id: PARENT_SPAN_ID.to_string(),
            span_name: CHILD_SPAN_NAME.to_string(),
            span_kind: kind.to_string(),
            service_name: service.to_string(),
            scope_name: service.to_string(),
            duration: 3600,
            status_code: "STATUS_CODE_UNSET".to_string(),
            ..SpanRow::default()
        },
    ]
}

/// The client trace starting at `start`, the server trace a minute later.
pub fn fixture_rows(start: DateTime<Utc>) -> Vec<SpanRow> {
    let mut rows = sample_trace(TRACE_ID_CLIENT, SERVICE_CLIENT, "client", start);
    rows.extend(sample_trace(
        TRACE_ID_SERVER,
        SERVICE_SERVER,
        "server",
        start + TimeDelta::minutes(1),
    ));
    rows
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn timestamp_literal(ts: &DateTime<Utc>) -> String {
    format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.6f"))
}

fn map_literal(attrs: &Attributes) -> String {
    if attrs.is_empty() {
        return "NULL".to_string();
    }
    let entries = attrs
        .iter()
        .map(|(k, v)| format!("{}: {}", quote(k), quote(v)))
        .collect::<Vec<_>>();
    format!("MAP {{{}}}", entries.join(", "))
}

fn list_literal(items: Vec<String>, element_type: &str) -> String {
    if items.is_empty() {
        return "NULL".to_string();
    }
    format!("[{}]::{element_type}[]", items.join(", "))
}

/// `INSERT` statement writing `rows` into `table` with literal values.
pub fn insert_sql(table: &str, rows: &[SpanRow]) -> String {
    let values = rows
        .iter()
        .map(|row| {
            let columns = [
                timestamp_literal(&row.timestamp),
                quote(&row.trace_id),
                quote(&row.span_id),
                quote(&row.parent_span_id),
                quote(&row.trace_state),
                quote(&row.span_name),
                quote(&row.span_kind),
                quote(&row.service_name),
                map_literal(&row.resource_attributes),
                quote(&row.scope_name),
                quote(&row.scope_version),
                map_literal(&row.span_attributes),
                row.duration.to_string(),
                quote(&row.status_code),
                quote(&row.status_message),
                list_literal(
                    row.event_timestamps.iter().map(timestamp_literal).collect(),
                    "TIMESTAMP",
                ),
                list_literal(row.event_names.iter().map(|n| quote(n)).collect(), "VARCHAR"),
                list_literal(
                    row.event_attributes.iter().map(map_literal).collect(),
                    "MAP(VARCHAR, VARCHAR)",
                ),
            ];
            format!("({})", columns.join(", "))
        })
        .collect::<Vec<_>>();
    format!("INSERT INTO {table} VALUES\n{};", values.join(",\n"))
}

pub async fn seed_store(store: &DuckStore, rows: &[SpanRow]) -> anyhow::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    store.execute_batch(insert_sql(store.table(), rows)).await?;
    Ok(())
}

/// Creates (or extends) a database file holding `rows`, for tests that run
/// the binary against a path.
pub fn seed_file(path: &Path, table: &str, rows: &[SpanRow]) -> anyhow::Result<()> {
    let conn = Connection::open(path)?;
    conn.execute_batch(&schema_sql(table))?;
    if !rows.is_empty() {
        conn.execute_batch(&insert_sql(table, rows))?;
    }
    Ok(())
}
