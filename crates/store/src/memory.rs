use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracehouse_core::error::{Result, TraceHouseError};
use tracehouse_core::filter::{TagMatch, TimeRange};
use tracehouse_core::query::SearchOptions;

use crate::reader::{SpanStore, TraceSearch};
use crate::row::SpanRow;

/// A search the store has served, as the planner issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSearch {
    pub range: TimeRange,
    pub exclude: Vec<String>,
    pub limit: usize,
}

/// Span table held in memory, with the same matching rules as the SQL
/// dialects. Records every search it serves.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Vec<SpanRow>,
    searches: Mutex<Vec<RecordedSearch>>,
    fetches: Mutex<Vec<Vec<String>>>,
    reverse_fetch: bool,
    ignore_exclusions: bool,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new(rows: Vec<SpanRow>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Return fetched rows in reverse table order.
    pub fn reverse_fetch(mut self) -> Self {
        self.reverse_fetch = true;
        self
    }

    /// Serve searches as if the exclusion list were empty.
    pub fn ignore_exclusions(mut self) -> Self {
        self.ignore_exclusions = true;
        self
    }

    /// Fail every call with a store error.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Sleep before answering every call.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn searches(&self) -> Vec<RecordedSearch> {
        lock(&self.searches).clone()
    }

    pub fn fetches(&self) -> Vec<Vec<String>> {
        lock(&self.fetches).clone()
    }

    async fn before_call(&self, op: &str) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(TraceHouseError::Store(format!("{op} failed: {message}"))),
            None => Ok(()),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SpanStore for MemoryStore {
    async fn services(&self) -> Result<Vec<String>> {
        self.before_call("services").await?;
        let mut out = self
            .rows
            .iter()
            .map(|r| r.service_name.clone())
            .collect::<Vec<_>>();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn operations(&self, service: &str) -> Result<Vec<String>> {
        self.before_call("operations").await?;
        let mut out = self
            .rows
            .iter()
            .filter(|r| r.service_name == service)
            .map(|r| r.span_name.clone())
            .collect::<Vec<_>>();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn search_trace_ids(&self, search: &TraceSearch<'_>) -> Result<Vec<String>> {
        lock(&self.searches).push(RecordedSearch {
            range: search.range,
            exclude: search.exclude.to_vec(),
            limit: search.remaining(),
        });
        self.before_call("search_trace_ids").await?;

        let matchers = compile_tags(search.options)?;
        let exclude: &[String] = if self.ignore_exclusions {
            &[]
        } else {
            search.exclude
        };

        let mut newest: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for row in &self.rows {
            if !row_matches(row, search.options, &search.range, &matchers)
                || exclude.contains(&row.trace_id)
            {
                continue;
            }
            let entry = newest.entry(row.trace_id.as_str()).or_insert(row.timestamp);
            if row.timestamp > *entry {
                *entry = row.timestamp;
            }
        }

        let mut ranked = newest.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let limit = if self.ignore_exclusions {
            search.options.limit
        } else {
            search.remaining()
        };
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.to_string())
            .collect())
    }

    async fn fetch_spans(&self, trace_ids: &[String]) -> Result<Vec<SpanRow>> {
        lock(&self.fetches).push(trace_ids.to_vec());
        self.before_call("fetch_spans").await?;
        let mut rows = self
            .rows
            .iter()
            .filter(|r| trace_ids.contains(&r.trace_id))
            .cloned()
            .collect::<Vec<_>>();
        if self.reverse_fetch {
            rows.reverse();
        }
        Ok(rows)
    }
}

enum TagMatcher {
    Regex(Regex),
    Like(Regex),
    Exact(String),
}

fn compile_tags(options: &SearchOptions) -> Result<Vec<(String, TagMatcher)>> {
    options
        .tags
        .iter()
        .map(|tag| {
            let matcher = match tag.matcher() {
                TagMatch::Regex(pattern) => TagMatcher::Regex(Regex::new(&pattern).map_err(|e| {
                    TraceHouseError::InvalidArgument(format!("bad tag regex {pattern:?}: {e}"))
                })?),
                TagMatch::Wildcard(pattern) => TagMatcher::Like(like_to_regex(&pattern)?),
                TagMatch::Exact(value) => TagMatcher::Exact(value),
            };
            Ok((tag.key.clone(), matcher))
        })
        .collect()
}

/// `%` is any run, `_` any one character, `\` escapes the next character.
fn like_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(&regex::escape("\\")),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Regex::new(&out)
        .map_err(|e| TraceHouseError::InvalidArgument(format!("bad tag pattern {pattern:?}: {e}")))
}

fn row_matches(
    row: &SpanRow,
    options: &SearchOptions,
    range: &TimeRange,
    tags: &[(String, TagMatcher)],
) -> bool {
    if row.service_name != options.service_name {
        return false;
    }
    if let Some(op) = options.operation_name.as_deref().filter(|op| !op.is_empty())
        && row.span_name != op
    {
        return false;
    }
    let secs = row.timestamp.timestamp();
    if secs < range.start.timestamp() || secs > range.end.timestamp() {
        return false;
    }
    if options.duration_min != 0 && row.duration < options.duration_min {
        return false;
    }
    if options.duration_max != 0 && row.duration > options.duration_max {
        return false;
    }
    tags.iter().all(|(key, matcher)| {
        let value = row.span_attributes.get(key).map(String::as_str).unwrap_or("");
        match matcher {
            TagMatcher::Regex(re) => re.is_match(value),
            TagMatcher::Like(re) => !value.is_empty() && re.is_match(value),
            TagMatcher::Exact(expected) => value == expected,
        }
    })
}
