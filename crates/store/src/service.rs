use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracehouse_core::error::{Result, TraceHouseError};
use tracehouse_core::filter::SearchWindow;
use tracehouse_core::ids::{TraceId, TraceIdNormalizer};
use tracehouse_core::model::trace::{DependencyLink, Trace};
use tracehouse_core::query::SearchOptions;
use tracing::{Instrument, Span};

use crate::assemble::assemble_traces;
use crate::context::RequestContext;
use crate::planner::SearchPlanner;
use crate::reader::SpanStore;
use crate::row::map_span_rows;

/// Trace lookups over a [`SpanStore`]: listing, progressive search, and
/// fetching assembled traces.
#[derive(Clone)]
pub struct TraceReader {
    store: Arc<dyn SpanStore>,
    normalizer: TraceIdNormalizer,
    span: Span,
}

impl TraceReader {
    pub fn new(store: Arc<dyn SpanStore>) -> Self {
        Self {
            store,
            normalizer: TraceIdNormalizer::default(),
            span: Span::none(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: TraceIdNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Parent for the spans every operation opens.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn list_services(&self, ctx: &RequestContext) -> Result<Vec<String>> {
        let span = tracing::debug_span!(parent: &self.span, "list_services");
        ctx.run("services", self.store.services())
            .instrument(span)
            .await
    }

    pub async fn list_operations(&self, ctx: &RequestContext, service: &str) -> Result<Vec<String>> {
        let span = tracing::debug_span!(parent: &self.span, "list_operations", service);
        ctx.run("operations", self.store.operations(service))
            .instrument(span)
            .await
    }

    pub async fn find_trace_ids(
        &self,
        ctx: &RequestContext,
        options: &SearchOptions,
        window: &SearchWindow,
    ) -> Result<Vec<TraceId>> {
        options.validate()?;
        let ids = self.planner(ctx).find_trace_ids(options, window).await?;
        ids.iter().map(|id| TraceId::parse(id)).collect()
    }

    pub async fn find_traces(
        &self,
        ctx: &RequestContext,
        options: &SearchOptions,
        window: &SearchWindow,
    ) -> Result<Vec<Trace>> {
        let ids = self.find_trace_ids(ctx, options, window).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.get_traces(ctx, &ids).await
    }

    pub async fn get_trace(&self, ctx: &RequestContext, trace_id: TraceId) -> Result<Trace> {
        self.get_traces(ctx, &[trace_id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TraceHouseError::NotFound {
                trace_id: trace_id.to_string(),
            })
    }

    /// Assembled traces in `trace_ids` order; ids with no spans are omitted.
    pub async fn get_traces(&self, ctx: &RequestContext, trace_ids: &[TraceId]) -> Result<Vec<Trace>> {
        let span = tracing::debug_span!(parent: &self.span, "get_traces", requested = trace_ids.len());
        async {
            if trace_ids.is_empty() {
                return Ok(Vec::new());
            }
            let stored = trace_ids
                .iter()
                .map(|id| self.normalizer.normalize(&id.to_string()))
                .collect::<Vec<_>>();
            let rows = ctx.run("fetch_spans", self.store.fetch_spans(&stored)).await?;
            let records = map_span_rows(rows)?;
            let traces = assemble_traces(trace_ids, records);
            tracing::debug!(found = traces.len(), "assembled traces");
            Ok::<_, TraceHouseError>(traces)
        }
        .instrument(span)
        .await
    }

    /// Service dependencies are not derived from spans; always empty.
    pub async fn get_dependencies(
        &self,
        _ctx: &RequestContext,
        end_time: DateTime<Utc>,
        lookback: TimeDelta,
    ) -> Result<Vec<DependencyLink>> {
        tracing::debug!(parent: &self.span, %end_time, lookback_secs = lookback.num_seconds(), "dependencies requested");
        Ok(Vec::new())
    }

    fn planner<'a>(&'a self, ctx: &'a RequestContext) -> SearchPlanner<'a> {
        SearchPlanner::new(self.store.as_ref(), ctx)
            .normalizer(self.normalizer)
            .with_span(self.span.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::row::SpanRow;

    fn row(trace: &str, span: &str, parent: &str) -> SpanRow {
        SpanRow {
            timestamp: Utc::now() - TimeDelta::minutes(1),
            trace_id: trace.into(),
            span_id: span.into(),
            parent_span_id: parent.into(),
            span_name: "op".into(),
            service_name: "api".into(),
            duration: 10,
            ..SpanRow::default()
        }
    }

    fn reader(store: MemoryStore) -> (TraceReader, Arc<MemoryStore>) {
        let store = Arc::new(store);
        (TraceReader::new(store.clone()), store)
    }

    #[tokio::test]
    async fn get_trace_of_unknown_id_is_not_found() {
        let (reader, _) = reader(MemoryStore::default());
        let err = reader
            .get_trace(&RequestContext::background(), TraceId::new(0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceHouseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_sends_padded_ids() {
        let (reader, store) = reader(MemoryStore::new(vec![row(
            "0000000000000000c91fd0eb7e1193f8",
            "0000000000000001",
            "",
        )]));
        let trace_id = TraceId::parse("c91fd0eb7e1193f8").unwrap();
        let trace = reader
            .get_trace(&RequestContext::background(), trace_id)
            .await
            .unwrap();
        assert_eq!(trace.trace_id, trace_id);
        assert_eq!(store.fetches(), vec![vec!["0000000000000000c91fd0eb7e1193f8".to_string()]]);
    }

    #[tokio::test]
    async fn find_traces_preserves_search_order() {
        let a = "843bc5b94cbaa733844dfe41f33167ad";
        let b = "373ee1ef9f1f5f2abc5d900ddc7e94ef";
        let mut newer = row(a, "a7d2aa025caa9cb8", "");
        newer.timestamp = Utc::now() - TimeDelta::seconds(10);
        let store = MemoryStore::new(vec![newer, row(b, "b7d2aa025caa9cb8", "")]).reverse_fetch();
        let (reader, _) = reader(store);

        let traces = reader
            .find_traces(
                &RequestContext::background(),
                &SearchOptions::for_service("api"),
                &SearchWindow::since(Utc::now() - TimeDelta::minutes(30)),
            )
            .await
            .unwrap();
        let ids = traces.iter().map(|t| t.trace_id.to_string()).collect::<Vec<_>>();
        assert_eq!(ids, vec![a, b]);
    }

    #[tokio::test]
    async fn find_requires_start_time_and_service() {
        let (reader, store) = reader(MemoryStore::default());
        let ctx = RequestContext::background();
        let err = reader
            .find_trace_ids(&ctx, &SearchOptions::for_service("api"), &SearchWindow::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TraceHouseError::MissingStartTime));

        let err = reader
            .find_trace_ids(&ctx, &SearchOptions::default(), &SearchWindow::since(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, TraceHouseError::InvalidArgument(_)));
        assert!(store.searches().is_empty());
    }

    #[tokio::test]
    async fn bad_stored_ids_surface_as_invalid_identifier() {
        let (reader, _) = reader(MemoryStore::new(vec![row("not-a-trace-id", "01", "")]));
        let err = reader
            .find_trace_ids(
                &RequestContext::background(),
                &SearchOptions::for_service("api"),
                &SearchWindow::since(Utc::now() - TimeDelta::minutes(5)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TraceHouseError::InvalidIdentifier { .. }));
    }

    #[tokio::test]
    async fn deadline_cuts_slow_fetches() {
        let store = MemoryStore::default().delayed(std::time::Duration::from_secs(30));
        let (reader, _) = reader(store);
        let ctx = RequestContext::with_timeout(std::time::Duration::from_millis(20));
        let err = reader.list_services(&ctx).await.unwrap_err();
        assert!(matches!(err, TraceHouseError::DeadlineExceeded(_)));
    }

    #[tokio::test]
    async fn dependencies_are_empty() {
        let (reader, _) = reader(MemoryStore::default());
        let end = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let deps = reader
            .get_dependencies(&RequestContext::background(), end, TimeDelta::hours(1))
            .await
            .unwrap();
        assert!(deps.is_empty());
    }
}
