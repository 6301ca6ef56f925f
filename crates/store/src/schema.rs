/// DDL for the span table in the OpenTelemetry collector's trace layout.
///
/// Nested `Events.*` columns are stored as parallel lists. The table name
/// must already have passed `validate_table_name`.
pub fn schema_sql(table: &str) -> String {
    let index_name = format!("idx_{}_trace", table.replace('.', "_"));
    let schema = table
        .split_once('.')
        .map(|(schema, _)| format!("CREATE SCHEMA IF NOT EXISTS {schema};\n"))
        .unwrap_or_default();

    format!(
        r#"{schema}
CREATE TABLE IF NOT EXISTS {table} (
  Timestamp TIMESTAMP NOT NULL,
  TraceId VARCHAR NOT NULL,
  SpanId VARCHAR NOT NULL,
  ParentSpanId VARCHAR NOT NULL DEFAULT '',
  TraceState VARCHAR NOT NULL DEFAULT '',
  SpanName VARCHAR NOT NULL,
  SpanKind VARCHAR NOT NULL DEFAULT '',
  ServiceName VARCHAR NOT NULL,
  ResourceAttributes MAP(VARCHAR, VARCHAR),
  ScopeName VARCHAR NOT NULL DEFAULT '',
  ScopeVersion VARCHAR NOT NULL DEFAULT '',
  SpanAttributes MAP(VARCHAR, VARCHAR),
  Duration BIGINT NOT NULL,
  StatusCode VARCHAR NOT NULL DEFAULT '',
  StatusMessage VARCHAR NOT NULL DEFAULT '',
  "Events.Timestamp" TIMESTAMP[],
  "Events.Name" VARCHAR[],
  "Events.Attributes" MAP(VARCHAR, VARCHAR)[]
);

CREATE INDEX IF NOT EXISTS {index_name} ON {table}(TraceId);
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_qualified_tables_create_their_schema() {
        let sql = schema_sql("otel.spans");
        assert!(sql.starts_with("CREATE SCHEMA IF NOT EXISTS otel;"));
        assert!(sql.contains("CREATE TABLE IF NOT EXISTS otel.spans ("));
        assert!(sql.contains("idx_otel_spans_trace ON otel.spans(TraceId)"));

        assert!(!schema_sql("otel_traces").contains("CREATE SCHEMA"));
    }
}
