use async_trait::async_trait;
use tracehouse_core::error::Result;
use tracehouse_core::filter::TimeRange;
use tracehouse_core::query::SearchOptions;

use crate::row::SpanRow;

/// One windowed trace-id search.
#[derive(Debug, Clone)]
pub struct TraceSearch<'a> {
    pub options: &'a SearchOptions,
    pub range: TimeRange,
    /// Ids already found by earlier windows, in stored width.
    pub exclude: &'a [String],
}

impl TraceSearch<'_> {
    /// Rows the store may return for this window.
    pub fn remaining(&self) -> usize {
        self.options.limit.saturating_sub(self.exclude.len())
    }
}

/// Read access to a span table.
#[async_trait]
pub trait SpanStore: Send + Sync {
    async fn services(&self) -> Result<Vec<String>>;

    async fn operations(&self, service: &str) -> Result<Vec<String>>;

    /// Trace ids matching the search, newest first, at most
    /// [`TraceSearch::remaining`] of them.
    async fn search_trace_ids(&self, search: &TraceSearch<'_>) -> Result<Vec<String>>;

    /// Every span row of the given traces, in store order.
    async fn fetch_spans(&self, trace_ids: &[String]) -> Result<Vec<SpanRow>>;
}
