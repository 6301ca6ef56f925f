use serde::{Deserialize, Serialize};

/// SQL flavour the predicate compiler renders for.
///
/// `ClickHouse` is the rendering for the OpenTelemetry collector's native
/// backend. `DuckDb` is what [`crate::DuckStore`] executes; it keeps the same
/// clause order and parameter order, and differs only in function names and
/// in how map columns and ordering are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    ClickHouse,
    DuckDb,
}

impl Dialect {
    pub(crate) fn time_range(self) -> &'static str {
        match self {
            Self::ClickHouse => "(Timestamp >= toDateTime(?) AND Timestamp <= toDateTime(?))",
            Self::DuckDb => "(epoch(Timestamp) >= ? AND epoch(Timestamp) <= ?)",
        }
    }

    /// Value of `SpanAttributes` for a bound key. Absent keys read as `''`.
    pub(crate) fn span_attribute(self) -> &'static str {
        match self {
            Self::ClickHouse => "SpanAttributes[?]",
            Self::DuckDb => {
                "coalesce(list_extract(map_values(SpanAttributes), list_position(map_keys(SpanAttributes), CAST(? AS VARCHAR))), '')"
            }
        }
    }

    pub(crate) fn regex_match(self, subject: &str) -> String {
        match self {
            Self::ClickHouse => format!("match({subject}, ?)"),
            Self::DuckDb => format!("regexp_matches({subject}, ?)"),
        }
    }

    pub(crate) fn like(self, subject: &str) -> String {
        match self {
            Self::ClickHouse => format!("{subject} LIKE ?"),
            Self::DuckDb => format!("{subject} LIKE ? ESCAPE '\\'"),
        }
    }

    /// Leading part of the trace-id search, up to `WHERE`.
    pub(crate) fn search_select(self, table: &str) -> String {
        match self {
            Self::ClickHouse => format!("SELECT DISTINCT TraceId FROM {table} WHERE"),
            Self::DuckDb => format!("SELECT TraceId FROM {table} WHERE"),
        }
    }

    /// Newest-first within the service's primary-key range.
    pub(crate) fn search_order(self) -> &'static str {
        match self {
            Self::ClickHouse => "ORDER BY ServiceName, -toUnixTimestamp(Timestamp)",
            Self::DuckDb => {
                "GROUP BY ServiceName, TraceId ORDER BY ServiceName, max(Timestamp) DESC, TraceId"
            }
        }
    }

    pub(crate) fn fetch_filter_keyword(self) -> &'static str {
        match self {
            Self::ClickHouse => "PREWHERE",
            Self::DuckDb => "WHERE",
        }
    }

    pub(crate) fn span_columns(self) -> &'static str {
        match self {
            Self::ClickHouse => CLICKHOUSE_SPAN_COLUMNS,
            Self::DuckDb => DUCKDB_SPAN_COLUMNS,
        }
    }

    pub(crate) fn services(self, table: &str) -> String {
        match self {
            Self::ClickHouse => {
                format!("SELECT DISTINCT ServiceName FROM {table} GROUP BY ServiceName")
            }
            Self::DuckDb => {
                format!("SELECT ServiceName FROM {table} GROUP BY ServiceName ORDER BY ServiceName")
            }
        }
    }

    pub(crate) fn operations(self, table: &str) -> String {
        match self {
            Self::ClickHouse => format!(
                "SELECT DISTINCT SpanName FROM {table} WHERE ServiceName = ? GROUP BY SpanName"
            ),
            Self::DuckDb => format!(
                "SELECT SpanName FROM {table} WHERE ServiceName = ? GROUP BY SpanName ORDER BY SpanName"
            ),
        }
    }
}

const CLICKHOUSE_SPAN_COLUMNS: &str = "Timestamp, TraceId, SpanId, ParentSpanId, TraceState, \
SpanName, SpanKind, ServiceName, ResourceAttributes, ScopeName, ScopeVersion, SpanAttributes, \
Duration, StatusCode, StatusMessage, Events.Timestamp, Events.Name, Events.Attributes";

// Nested columns come back as JSON text; event timestamps as epoch microseconds.
const DUCKDB_SPAN_COLUMNS: &str = "Timestamp, TraceId, SpanId, ParentSpanId, TraceState, \
SpanName, SpanKind, ServiceName, to_json(ResourceAttributes), ScopeName, ScopeVersion, \
to_json(SpanAttributes), Duration, StatusCode, StatusMessage, \
to_json(list_transform(\"Events.Timestamp\", t -> epoch_us(t))), to_json(\"Events.Name\"), \
to_json(\"Events.Attributes\")";
