use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracehouse_core::error::{Result, TraceHouseError};
use tracehouse_core::filter::{SearchWindow, TimeRange};
use tracehouse_core::ids::TraceIdNormalizer;
use tracehouse_core::query::SearchOptions;
use tracing::{Instrument, Span};

use crate::context::RequestContext;
use crate::reader::{SpanStore, TraceSearch};

/// Ranges shorter than this plus [`PROGRESSIVE_MARGIN_SECS`] are searched in
/// one query. Also the smallest first window.
pub const MIN_PROGRESSIVE_WINDOW_SECS: i64 = 60 * 60;
pub const PROGRESSIVE_MARGIN_SECS: i64 = 60;
pub const MAX_PROGRESSIVE_STEPS: usize = 4;

/// Finds trace ids by scanning backwards from the end of the requested
/// range in windows that double each step, stopping as soon as enough ids
/// are found. The last step covers whatever remains of the range.
pub struct SearchPlanner<'a> {
    store: &'a dyn SpanStore,
    ctx: &'a RequestContext,
    normalizer: TraceIdNormalizer,
    span: Span,
}

impl<'a> SearchPlanner<'a> {
    pub fn new(store: &'a dyn SpanStore, ctx: &'a RequestContext) -> Self {
        Self {
            store,
            ctx,
            normalizer: TraceIdNormalizer::default(),
            span: Span::current(),
        }
    }

    pub fn normalizer(mut self, normalizer: TraceIdNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn find_trace_ids(
        &self,
        options: &SearchOptions,
        window: &SearchWindow,
    ) -> Result<Vec<String>> {
        self.find_trace_ids_at(options, window, Utc::now()).await
    }

    /// As [`Self::find_trace_ids`], with `now` standing in for a missing
    /// `start_max`.
    pub async fn find_trace_ids_at(
        &self,
        options: &SearchOptions,
        window: &SearchWindow,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let start_min = window.start_min.ok_or(TraceHouseError::MissingStartTime)?;
        let end = window.start_max.unwrap_or(now);
        let full = TimeRange::new(start_min, end);

        let span = tracing::debug_span!(
            parent: &self.span,
            "find_trace_ids",
            service = %options.service_name,
            limit = options.limit,
        );
        self.walk(options, full).instrument(span).await
    }

    async fn walk(&self, options: &SearchOptions, full: TimeRange) -> Result<Vec<String>> {
        if options.limit == 0 || full.is_empty() {
            tracing::debug!("nothing to search");
            return Ok(Vec::new());
        }

        let mut found = Found::new(options.limit);
        let full_span = full.span();
        let min_window = TimeDelta::seconds(MIN_PROGRESSIVE_WINDOW_SECS);

        if full_span < min_window + TimeDelta::seconds(PROGRESSIVE_MARGIN_SECS) {
            self.ctx.check("find_trace_ids")?;
            let ids = self.search_window(options, full, &[]).await?;
            found.absorb(ids, &self.normalizer);
            return Ok(found.into_ids());
        }

        let mut sub_window = full_span;
        for _ in 0..MAX_PROGRESSIVE_STEPS {
            sub_window = sub_window / 2;
        }
        sub_window = sub_window.max(min_window);

        let mut window_end = full.end;
        for step in 0..MAX_PROGRESSIVE_STEPS {
            if found.is_full() {
                break;
            }
            self.ctx.check("find_trace_ids")?;

            if step == MAX_PROGRESSIVE_STEPS - 1 {
                sub_window = full_span;
            }
            let window_start = window_end
                .checked_sub_signed(sub_window)
                .map_or(full.start, |start| start.max(full.start));
            if window_start >= window_end {
                break;
            }

            let range = TimeRange::new(window_start, window_end);
            let ids = self.search_window(options, range, found.ids()).await?;
            let added = found.absorb(ids, &self.normalizer);
            tracing::debug!(step, added, total = found.len(), "progressive step");

            window_end = window_start;
            sub_window = sub_window.checked_mul(2).unwrap_or(full_span);
        }

        Ok(found.into_ids())
    }

    async fn search_window(
        &self,
        options: &SearchOptions,
        range: TimeRange,
        exclude: &[String],
    ) -> Result<Vec<String>> {
        let search = TraceSearch {
            options,
            range,
            exclude,
        };
        self.ctx
            .run("search_trace_ids", self.store.search_trace_ids(&search))
            .await
    }
}

/// Ordered, duplicate-free, capped id list.
struct Found {
    ids: Vec<String>,
    seen: HashSet<String>,
    limit: usize,
}

impl Found {
    fn new(limit: usize) -> Self {
        Self {
            ids: Vec::new(),
            seen: HashSet::new(),
            limit,
        }
    }

    fn absorb(&mut self, ids: Vec<String>, normalizer: &TraceIdNormalizer) -> usize {
        let before = self.ids.len();
        for id in ids {
            if self.is_full() {
                break;
            }
            let id = normalizer.normalize(&id);
            if self.seen.insert(id.clone()) {
                self.ids.push(id);
            }
        }
        self.ids.len() - before
    }

    fn is_full(&self) -> bool {
        self.ids.len() >= self.limit
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn ids(&self) -> &[String] {
        &self.ids
    }

    fn into_ids(self) -> Vec<String> {
        self.ids
    }
}
