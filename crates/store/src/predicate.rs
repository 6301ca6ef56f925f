use tracehouse_core::filter::{TagMatch, TimeRange};
use tracehouse_core::query::SearchOptions;

use crate::dialect::Dialect;
use crate::sql::{ClauseBuilder, Param, Statement};

/// Renders search, fetch and listing statements against one span table.
///
/// Every request value is bound as a parameter. Only the table name (checked
/// by `validate_table_name` when the configuration is loaded) and the
/// integer row limit are written into the SQL text.
#[derive(Debug, Clone)]
pub struct PredicateCompiler {
    dialect: Dialect,
    table: String,
}

impl PredicateCompiler {
    pub fn new(dialect: Dialect, table: impl Into<String>) -> Self {
        Self {
            dialect,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Trace-id search over one planner window.
    ///
    /// Clause order: service, operation, time range, duration bounds, tags in
    /// request order, exclusions. The row limit is `options.limit` minus the
    /// number of excluded ids, floored at zero.
    pub fn compile_search(
        &self,
        options: &SearchOptions,
        range: &TimeRange,
        exclude: &[String],
    ) -> Statement {
        let d = self.dialect;
        let mut clauses = ClauseBuilder::new();

        clauses.push("ServiceName = ?", [Param::text(&options.service_name)]);
        if let Some(operation) = options.operation_name.as_deref().filter(|op| !op.is_empty()) {
            clauses.push("SpanName = ?", [Param::text(operation)]);
        }
        clauses.push(
            d.time_range(),
            [
                Param::Int(range.start.timestamp()),
                Param::Int(range.end.timestamp()),
            ],
        );
        if options.duration_min != 0 {
            clauses.push("Duration >= ?", [Param::Int(options.duration_min)]);
        }
        if options.duration_max != 0 {
            clauses.push("Duration <= ?", [Param::Int(options.duration_max)]);
        }

        let attr = d.span_attribute();
        for tag in &options.tags {
            match tag.matcher() {
                TagMatch::Regex(pattern) => clauses.push(
                    d.regex_match(attr),
                    [Param::text(&tag.key), Param::Text(pattern)],
                ),
                TagMatch::Wildcard(pattern) => clauses.push(
                    format!("({} AND {attr} != '')", d.like(attr)),
                    [
                        Param::text(&tag.key),
                        Param::Text(pattern),
                        Param::text(&tag.key),
                    ],
                ),
                TagMatch::Exact(value) => clauses.push(
                    format!("{attr} = ?"),
                    [Param::text(&tag.key), Param::Text(value)],
                ),
            }
        }

        if !exclude.is_empty() {
            clauses.push_in_list("TraceId", exclude, true);
        }

        let limit = options.limit.saturating_sub(exclude.len());
        let (predicate, params) = clauses.finish();
        let sql = format!(
            "{} {predicate} {} LIMIT {limit}",
            d.search_select(&self.table),
            d.search_order()
        );
        Statement::new(sql, params)
    }

    /// All span rows of the given traces. The ids must already be in the
    /// table's stored width.
    pub fn compile_fetch(&self, trace_ids: &[String]) -> Statement {
        let d = self.dialect;
        let mut clauses = ClauseBuilder::new();
        if trace_ids.is_empty() {
            clauses.push("1 = 0", []);
        } else {
            clauses.push_in_list("TraceId", trace_ids, false);
        }
        let (predicate, params) = clauses.finish();
        let sql = format!(
            "SELECT {} FROM {} {} {predicate}",
            d.span_columns(),
            self.table,
            d.fetch_filter_keyword()
        );
        Statement::new(sql, params)
    }

    pub fn compile_services(&self) -> Statement {
        Statement::new(self.dialect.services(&self.table), Vec::new())
    }

    pub fn compile_operations(&self, service: &str) -> Statement {
        Statement::new(
            self.dialect.operations(&self.table),
            vec![Param::text(service)],
        )
    }
}
