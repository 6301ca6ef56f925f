use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{InterruptHandle, params_from_iter};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracehouse_core::config::{Config, validate_table_name};
use tracehouse_core::error::{Result, TraceHouseError};
use tracehouse_core::filter::TagFilter;
use tracehouse_core::model::span::Attributes;
use tracing::Instrument;

use crate::dialect::Dialect;
use crate::pool::{ConnectionPool, PoolOptions, PoolStatus, checkout};
use crate::predicate::PredicateCompiler;
use crate::reader::{SpanStore, TraceSearch};
use crate::row::SpanRow;
use crate::schema::schema_sql;
use crate::sql::{Param, Statement};

/// Span table in a DuckDB database, queried through a connection pool.
#[derive(Clone)]
pub struct DuckStore {
    pool: ConnectionPool,
    compiler: PredicateCompiler,
}

impl DuckStore {
    pub fn open(path: &Path, table: &str, options: PoolOptions) -> Result<Self> {
        validate_table_name(table)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| TraceHouseError::Io(format!("failed to create db dir: {e}")))?;
        }
        Self::init(options.open_file(path)?, table)
    }

    pub fn open_in_memory(table: &str, options: PoolOptions) -> Result<Self> {
        validate_table_name(table)?;
        Self::init(options.open_in_memory()?, table)
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::open(&cfg.db_path, &cfg.table, PoolOptions::from(cfg))
    }

    fn init(pool: ConnectionPool, table: &str) -> Result<Self> {
        let conn = pool
            .get()
            .map_err(|e| TraceHouseError::Store(format!("connection checkout failed: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| TraceHouseError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(&schema_sql(table))
            .map_err(|e| TraceHouseError::Store(format!("failed to initialize schema: {e}")))?;
        drop(conn);

        Ok(Self {
            pool,
            compiler: PredicateCompiler::new(Dialect::DuckDb, table),
        })
    }

    pub fn table(&self) -> &str {
        self.compiler.table()
    }

    pub fn pool_status(&self) -> PoolStatus {
        PoolStatus::of(&self.pool)
    }

    /// Runs raw SQL on a pooled connection. Used to seed fixtures.
    pub async fn execute_batch(&self, sql: String) -> Result<()> {
        let conn = checkout(&self.pool).await?;
        tokio::task::spawn_blocking(move || {
            conn.execute_batch(&sql)
                .map_err(|e| TraceHouseError::Store(format!("execute batch failed: {e}")))
        })
        .await
        .map_err(|e| TraceHouseError::Internal(format!("execute batch task failed: {e}")))?
    }

    /// Runs `statement` on the blocking pool. Dropping the returned future
    /// before it completes interrupts the statement, so a cancelled request
    /// hands its connection back as soon as DuckDB notices.
    async fn query<T, F>(&self, label: &'static str, statement: Statement, map: F) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&duckdb::Row<'_>) -> duckdb::Result<T> + Send + 'static,
    {
        let conn = checkout(&self.pool).await?;
        tracing::trace!(
            label,
            sql = %statement.sql,
            params = statement.params.len(),
            pool = ?self.pool_status(),
            "query"
        );
        let guard = InterruptOnDrop::new(label, conn.interrupt_handle());

        let result = tokio::task::spawn_blocking(move || {
            let mut stmt = conn
                .prepare(&statement.sql)
                .map_err(|e| TraceHouseError::Store(format!("prepare {label} failed: {e}")))?;
            let args = statement
                .params
                .iter()
                .map(Param::to_value)
                .collect::<Vec<_>>();
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| map(row))
                .map_err(|e| TraceHouseError::Store(format!("query {label} failed: {e}")))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(|e| row_error(label, e))?);
            }
            Ok::<_, TraceHouseError>(out)
        })
        .await;
        guard.disarm();

        result.map_err(|e| TraceHouseError::Internal(format!("{label} task failed: {e}")))?
    }
}

/// Interrupts the connection's running statement unless disarmed first.
struct InterruptOnDrop {
    label: &'static str,
    handle: Option<Arc<InterruptHandle>>,
}

impl InterruptOnDrop {
    fn new(label: &'static str, handle: Arc<InterruptHandle>) -> Self {
        Self {
            label,
            handle: Some(handle),
        }
    }

    fn disarm(mut self) {
        self.handle = None;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(label = self.label, "interrupting abandoned query");
            handle.interrupt();
        }
    }
}

/// `key MODE value` per tag filter, where MODE is how the value is matched.
fn describe_tags(tags: &[TagFilter]) -> String {
    tags.iter()
        .map(|tag| format!("{} {} {}", tag.key, tag.matcher().mode(), tag.value))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Column values that do not convert to the expected Rust type are decode
/// failures, not store failures.
fn row_error(label: &str, err: duckdb::Error) -> TraceHouseError {
    match err {
        duckdb::Error::FromSqlConversionFailure(column, ty, source) => TraceHouseError::Decode(
            format!("{label}: column {column} holds a {ty} that does not convert: {source}"),
        ),
        duckdb::Error::InvalidColumnType(column, name, ty) => TraceHouseError::Decode(format!(
            "{label}: column {column} ({name}) has unexpected type {ty}"
        )),
        duckdb::Error::IntegralValueOutOfRange(column, value) => TraceHouseError::Decode(format!(
            "{label}: column {column} value {value} is out of range"
        )),
        other => TraceHouseError::Store(format!("map {label} row failed: {other}")),
    }
}

#[async_trait]
impl SpanStore for DuckStore {
    async fn services(&self) -> Result<Vec<String>> {
        self.query("services", self.compiler.compile_services(), |row| {
            row.get::<_, String>(0)
        })
        .await
    }

    async fn operations(&self, service: &str) -> Result<Vec<String>> {
        self.query(
            "operations",
            self.compiler.compile_operations(service),
            |row| row.get::<_, String>(0),
        )
        .await
    }

    async fn search_trace_ids(&self, search: &TraceSearch<'_>) -> Result<Vec<String>> {
        let statement = self
            .compiler
            .compile_search(search.options, &search.range, search.exclude);
        let span = tracing::debug_span!(
            "search_trace_ids",
            db.statement = %statement.sql,
            query.tags = %describe_tags(&search.options.tags),
            start = %search.range.start,
            end = %search.range.end,
            excluded = search.exclude.len(),
        );
        async {
            let ids = self
                .query("search_trace_ids", statement, |row| row.get::<_, String>(0))
                .await?;
            tracing::debug!(found = ids.len(), "searched window");
            Ok::<_, TraceHouseError>(ids)
        }
        .instrument(span)
        .await
    }

    async fn fetch_spans(&self, trace_ids: &[String]) -> Result<Vec<SpanRow>> {
        if trace_ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw = self
            .query("fetch_spans", self.compiler.compile_fetch(trace_ids), |row| {
                Ok(RawSpanRow {
                    timestamp: row.get::<_, NaiveDateTime>(0)?,
                    trace_id: row.get(1)?,
                    span_id: row.get(2)?,
                    parent_span_id: row.get(3)?,
                    trace_state: row.get(4)?,
                    span_name: row.get(5)?,
                    span_kind: row.get(6)?,
                    service_name: row.get(7)?,
                    resource_attributes: row.get(8)?,
                    scope_name: row.get(9)?,
                    scope_version: row.get(10)?,
                    span_attributes: row.get(11)?,
                    duration: row.get(12)?,
                    status_code: row.get(13)?,
                    status_message: row.get(14)?,
                    event_timestamps: row.get(15)?,
                    event_names: row.get(16)?,
                    event_attributes: row.get(17)?,
                })
            })
            .await?;
        tracing::debug!(traces = trace_ids.len(), rows = raw.len(), "fetched spans");
        raw.into_iter().map(RawSpanRow::decode).collect()
    }
}

/// Row as read from DuckDB: nested columns still JSON text, nullable text
/// columns still optional.
struct RawSpanRow {
    timestamp: NaiveDateTime,
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    trace_state: Option<String>,
    span_name: String,
    span_kind: Option<String>,
    service_name: String,
    resource_attributes: Option<String>,
    scope_name: Option<String>,
    scope_version: Option<String>,
    span_attributes: Option<String>,
    duration: i64,
    status_code: Option<String>,
    status_message: Option<String>,
    event_timestamps: Option<String>,
    event_names: Option<String>,
    event_attributes: Option<String>,
}

impl RawSpanRow {
    fn decode(self) -> Result<SpanRow> {
        let at = |column: &str| format!("{column} of span {}/{}", self.trace_id, self.span_id);

        let resource_attributes =
            decode_attributes(&self.resource_attributes, || at("ResourceAttributes"))?;
        let span_attributes = decode_attributes(&self.span_attributes, || at("SpanAttributes"))?;
        let event_micros: Vec<i64> =
            decode_json(&self.event_timestamps, || at("Events.Timestamp"))?;
        let event_timestamps = event_micros
            .into_iter()
            .map(|us| {
                DateTime::<Utc>::from_timestamp_micros(us).ok_or_else(|| {
                    TraceHouseError::Decode(format!(
                        "{}: timestamp {us}us out of range",
                        at("Events.Timestamp")
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let event_names: Vec<String> = decode_json(&self.event_names, || at("Events.Name"))?;
        let event_attributes: Vec<Option<JsonMap>> =
            decode_json(&self.event_attributes, || at("Events.Attributes"))?;

        Ok(SpanRow {
            timestamp: self.timestamp.and_utc(),
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id.unwrap_or_default(),
            trace_state: self.trace_state.unwrap_or_default(),
            span_name: self.span_name,
            span_kind: self.span_kind.unwrap_or_default(),
            service_name: self.service_name,
            resource_attributes,
            scope_name: self.scope_name.unwrap_or_default(),
            scope_version: self.scope_version.unwrap_or_default(),
            span_attributes,
            duration: self.duration,
            status_code: self.status_code.unwrap_or_default(),
            status_message: self.status_message.unwrap_or_default(),
            event_timestamps,
            event_names,
            event_attributes: event_attributes
                .into_iter()
                .map(|m| m.map(JsonMap::into_attributes).unwrap_or_default())
                .collect(),
        })
    }
}

/// DuckDB renders `MAP(VARCHAR, VARCHAR)` as a JSON object; older builds
/// emit a list of key/value pairs.
#[derive(Deserialize)]
#[serde(untagged)]
enum JsonMap {
    Object(Attributes),
    Pairs(Vec<KeyValue>),
}

#[derive(Deserialize)]
struct KeyValue {
    key: String,
    value: Option<String>,
}

impl JsonMap {
    fn into_attributes(self) -> Attributes {
        match self {
            Self::Object(attrs) => attrs,
            Self::Pairs(pairs) => pairs
                .into_iter()
                .map(|kv| (kv.key, kv.value.unwrap_or_default()))
                .collect(),
        }
    }
}

fn decode_json<T>(raw: &Option<String>, at: impl Fn() -> String) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match raw.as_deref() {
        None | Some("null") => Ok(T::default()),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| TraceHouseError::Decode(format!("{}: {e}", at()))),
    }
}

fn decode_attributes(raw: &Option<String>, at: impl Fn() -> String) -> Result<Attributes> {
    let map: Option<JsonMap> = decode_json(raw, at)?;
    Ok(map.map(JsonMap::into_attributes).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeDelta, TimeZone};
    use tracehouse_core::filter::TimeRange;
    use tracehouse_core::query::SearchOptions;

    use super::*;
    use crate::context::RequestContext;

    const SEED: &str = r#"
INSERT INTO otel_traces VALUES
  (TIMESTAMP '2026-02-01 11:50:00', '843bc5b94cbaa733844dfe41f33167ad', 'a7d2aa025caa9cb8', '', '',
   'parent-span', 'SPAN_KIND_CLIENT', 'test-client',
   MAP {'resource-1': 'value-1'}, 'scope', '1.0',
   MAP {'attr-1': 'value-1', 'discount': '50%'}, 3600, 'STATUS_CODE_UNSET', '',
   [TIMESTAMP '2026-02-01 11:50:01'], ['retry'], [MAP {'attempt': '2'}]),
  (TIMESTAMP '2026-02-01 11:50:00', '843bc5b94cbaa733844dfe41f33167ad', '0d8fd33795ba49aa', 'a7d2aa025caa9cb8', '',
   'child-span', 'SPAN_KIND_CLIENT', 'test-client',
   NULL, '', '', NULL, 3600, 'STATUS_CODE_ERROR', 'boom',
   NULL, NULL, NULL),
  (TIMESTAMP '2026-02-01 11:55:00', '373ee1ef9f1f5f2abc5d900ddc7e94ef', 'b7d2aa025caa9cb8', '', '',
   'parent-span', 'SPAN_KIND_SERVER', 'test-server',
   NULL, '', '', MAP {'attr-1': 'other'}, 7200, 'STATUS_CODE_UNSET', '',
   [], [], []);
"#;

    async fn seeded() -> DuckStore {
        let store = DuckStore::open_in_memory("otel_traces", PoolOptions::default()).unwrap();
        store.execute_batch(SEED.to_string()).await.unwrap();
        store
    }

    fn range() -> TimeRange {
        let end = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap();
        TimeRange::new(end - TimeDelta::hours(1), end)
    }

    #[tokio::test]
    async fn lists_services_and_operations() {
        let store = seeded().await;
        assert_eq!(store.services().await.unwrap(), vec!["test-client", "test-server"]);
        assert_eq!(
            store.operations("test-client").await.unwrap(),
            vec!["child-span", "parent-span"]
        );
        assert!(store.operations("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_applies_tag_modes_and_absent_keys() {
        let store = seeded().await;
        let search = |tags: Vec<TagFilter>| SearchOptions {
            tags,
            ..SearchOptions::for_service("test-client")
        };

        for (tags, expected) in [
            (vec![TagFilter::new("attr-1", "value-1")], 1),
            (vec![TagFilter::new("attr-1", "~^value-\\d$")], 1),
            (vec![TagFilter::new("discount", "50\\%")], 1),
            (vec![TagFilter::new("discount", "5%")], 1),
            (vec![TagFilter::new("missing", "%")], 0),
            (vec![TagFilter::new("missing", "")], 1),
            (vec![TagFilter::new("attr-1", "value-2")], 0),
        ] {
            let opts = search(tags.clone());
            let ids = store
                .search_trace_ids(&TraceSearch {
                    options: &opts,
                    range: range(),
                    exclude: &[],
                })
                .await
                .unwrap();
            assert_eq!(ids.len(), expected, "tags {tags:?}");
        }
    }

    #[tokio::test]
    async fn search_honours_exclusions_and_duration() {
        let store = seeded().await;
        let opts = SearchOptions::for_service("test-client");
        let exclude = vec!["843bc5b94cbaa733844dfe41f33167ad".to_string()];
        let ids = store
            .search_trace_ids(&TraceSearch {
                options: &opts,
                range: range(),
                exclude: &exclude,
            })
            .await
            .unwrap();
        assert!(ids.is_empty());

        let slow = SearchOptions {
            duration_min: 5000,
            ..SearchOptions::for_service("test-server")
        };
        let ids = store
            .search_trace_ids(&TraceSearch {
                options: &slow,
                range: range(),
                exclude: &[],
            })
            .await
            .unwrap();
        assert_eq!(ids, vec!["373ee1ef9f1f5f2abc5d900ddc7e94ef"]);
    }

    #[tokio::test]
    async fn fetch_decodes_nested_columns() {
        let store = seeded().await;
        let rows = store
            .fetch_spans(&["843bc5b94cbaa733844dfe41f33167ad".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);

        let parent = rows.iter().find(|r| r.span_name == "parent-span").unwrap();
        assert_eq!(parent.resource_attributes["resource-1"], "value-1");
        assert_eq!(parent.span_attributes.len(), 2);
        assert_eq!(parent.event_names, vec!["retry"]);
        assert_eq!(
            parent.event_timestamps,
            vec![Utc.with_ymd_and_hms(2026, 2, 1, 11, 50, 1).unwrap()]
        );
        assert_eq!(parent.event_attributes[0]["attempt"], "2");

        let child = rows.iter().find(|r| r.span_name == "child-span").unwrap();
        assert_eq!(child.parent_span_id, "a7d2aa025caa9cb8");
        assert!(child.span_attributes.is_empty());
        assert!(child.event_names.is_empty());
        assert_eq!(child.status_message, "boom");

        assert!(store.fetch_spans(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconvertible_timestamp_is_a_decode_error() {
        let store = DuckStore::open_in_memory("otel_traces", PoolOptions::default()).unwrap();
        let text_timestamps = schema_sql("otel_traces")
            .replace("Timestamp TIMESTAMP NOT NULL", "Timestamp VARCHAR NOT NULL");
        store
            .execute_batch(format!(
                "DROP INDEX idx_otel_traces_trace; DROP TABLE otel_traces; {text_timestamps}
                 INSERT INTO otel_traces (Timestamp, TraceId, SpanId, SpanName, ServiceName, Duration)
                 VALUES ('not-a-timestamp', 'abc', '0000000000000001', 'GET', 'api', 1);"
            ))
            .await
            .unwrap();

        let err = store.fetch_spans(&["abc".to_string()]).await.unwrap_err();
        assert!(
            matches!(&err, TraceHouseError::Decode(msg) if msg.starts_with("fetch_spans: column 0")),
            "{err:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_query_is_interrupted_and_releases_its_connection() {
        let store = seeded().await;
        let slow = Statement::new(
            "SELECT count(*) FROM range(1000000000) a(i), range(100000) b(j) WHERE (a.i + b.j) % 7 = 3",
            Vec::new(),
        );
        let ctx = RequestContext::with_timeout(Duration::from_millis(100));
        let err = ctx
            .run("slow", store.query("slow", slow, |row| row.get::<_, i64>(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceHouseError::DeadlineExceeded(_)));

        let released = async {
            while store.pool_status().in_use > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), released)
            .await
            .expect("interrupted query kept its connection");
        assert_eq!(store.services().await.unwrap(), vec!["test-client", "test-server"]);
    }

    #[test]
    fn search_span_describes_each_tag_mode() {
        let tags = vec![
            TagFilter::new("user", "~adm.*"),
            TagFilter::new("discount", "5%"),
            TagFilter::new("http.status", "500"),
        ];
        assert_eq!(
            describe_tags(&tags),
            "user MATCH ~adm.*, discount LIKE 5%, http.status EQUAL 500"
        );
        assert_eq!(describe_tags(&[]), "");
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let raw = Some("{not json".to_string());
        let err = decode_attributes(&raw, || "SpanAttributes".to_string()).unwrap_err();
        assert!(matches!(err, TraceHouseError::Decode(msg) if msg.starts_with("SpanAttributes")));

        let pairs = Some(r#"[{"key":"k","value":"v"}]"#.to_string());
        assert_eq!(decode_attributes(&pairs, String::new).unwrap()["k"], "v");
    }

    #[test]
    fn rejects_bad_table_names() {
        assert!(DuckStore::open_in_memory("x; DROP", PoolOptions::default()).is_err());
    }
}
