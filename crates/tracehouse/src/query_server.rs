use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracehouse_core::error::{Result, TraceHouseError};
use tracehouse_core::filter::{SearchWindow, TagFilter};
use tracehouse_core::ids::TraceId;
use tracehouse_core::model::trace::{DependencyLink, Trace};
use tracehouse_core::query::SearchOptions;
use tracehouse_core::time::{duration_to_nanos, from_unix_micros, parse_duration_str};
use tracehouse_store::{RequestContext, TraceReader};
use tracing::{Instrument, Level};
use uuid::Uuid;

use crate::protocol::{ApiRequest, ApiResponse, FindRequest};

/// Shared by every listener: the reader plus the per-request time budget.
#[derive(Clone)]
pub struct QueryState {
    reader: TraceReader,
    query_timeout: Duration,
}

impl QueryState {
    pub fn new(reader: TraceReader, query_timeout: Duration) -> Self {
        Self {
            reader,
            query_timeout,
        }
    }

    /// Reader and context for one request, under a span tagged with a fresh
    /// request id.
    fn begin(&self, op: &'static str) -> (TraceReader, RequestContext, tracing::Span) {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("query", %request_id, op);
        let reader = self.reader.clone().with_span(span.clone());
        (reader, RequestContext::with_timeout(self.query_timeout), span)
    }
}

pub async fn run_query_server(
    state: QueryState,
    uds_path: PathBuf,
    tcp_addr: SocketAddr,
) -> anyhow::Result<()> {
    if let Some(parent) = uds_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("create uds parent dir")?;
    }

    if tokio::fs::metadata(&uds_path).await.is_ok() {
        let _ = tokio::fs::remove_file(&uds_path).await;
    }

    let uds_listener = UnixListener::bind(&uds_path).context("bind UDS query listener")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(&uds_path).await?.permissions();
        perms.set_mode(0o600);
        tokio::fs::set_permissions(&uds_path, perms).await?;
    }
    let tcp_listener = TcpListener::bind(tcp_addr)
        .await
        .context("bind TCP query listener")?;

    let uds_task = tokio::spawn(run_uds_loop(uds_listener, state.clone()));
    let tcp_task = tokio::spawn(run_tcp_loop(tcp_listener, state));

    tokio::select! {
        res = uds_task => {
            res??;
        }
        res = tcp_task => {
            res??;
        }
    }

    Ok(())
}

async fn run_uds_loop(listener: UnixListener, state: QueryState) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(BufReader::new(stream), state).await {
                tracing::warn!(error = ?err, "uds client request failed");
            }
        });
    }
}

async fn run_tcp_loop(listener: TcpListener, state: QueryState) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_stream(BufReader::new(stream), state).await {
                tracing::warn!(error = ?err, "tcp client request failed");
            }
        });
    }
}

/// One JSON request per line, answered in order, until the peer hangs up.
async fn handle_stream<T>(mut stream: BufReader<T>, state: QueryState) -> anyhow::Result<()>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let n = stream.read_line(&mut line).await?;
        if n == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ApiRequest>(&line) {
            Ok(req) => handle_request(req, &state).await,
            Err(err) => ApiResponse::from(TraceHouseError::InvalidArgument(format!(
                "malformed request: {err}"
            ))),
        };
        let payload = serde_json::to_vec(&response)?;
        stream.get_mut().write_all(&payload).await?;
        stream.get_mut().write_all(b"\n").await?;
        stream.get_mut().flush().await?;
    }
}

pub async fn handle_request(req: ApiRequest, state: &QueryState) -> ApiResponse {
    let (reader, ctx, span) = state.begin(req.op());
    match dispatch(req, &reader, &ctx).instrument(span.clone()).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(parent: &span, error = %err, "query failed");
            ApiResponse::from(err)
        }
    }
}

async fn dispatch(req: ApiRequest, reader: &TraceReader, ctx: &RequestContext) -> Result<ApiResponse> {
    match req {
        ApiRequest::Services => reader.list_services(ctx).await.map(ApiResponse::Services),
        ApiRequest::Operations { service } => reader
            .list_operations(ctx, &service)
            .await
            .map(ApiResponse::Operations),
        ApiRequest::Traces { trace_ids } => {
            let ids = trace_ids
                .iter()
                .map(|id| TraceId::parse(id))
                .collect::<Result<Vec<_>>>()?;
            reader.get_traces(ctx, &ids).await.map(ApiResponse::Traces)
        }
        ApiRequest::Find(FindRequest {
            options,
            window,
            ids_only: true,
        }) => {
            let ids = reader.find_trace_ids(ctx, &options, &window).await?;
            Ok(ApiResponse::TraceIds(ids.iter().map(TraceId::to_string).collect()))
        }
        ApiRequest::Find(FindRequest { options, window, .. }) => reader
            .find_traces(ctx, &options, &window)
            .await
            .map(ApiResponse::Traces),
        ApiRequest::Dependencies {
            end_time,
            lookback_secs,
        } => {
            let lookback = TimeDelta::try_seconds(lookback_secs).ok_or_else(|| {
                TraceHouseError::InvalidArgument(format!("lookback of {lookback_secs}s is out of range"))
            })?;
            reader
                .get_dependencies(ctx, end_time.unwrap_or_else(Utc::now), lookback)
                .await
                .map(ApiResponse::Dependencies)
        }
    }
}

pub async fn run_query_http_server(state: QueryState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context("bind HTTP query listener")?;
    axum::serve(listener, router(state))
        .await
        .context("HTTP query server failed")
}

pub fn router(state: QueryState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    Router::new()
        .route("/api/services", get(http_services))
        .route("/api/services/{service}/operations", get(http_operations))
        .route("/api/traces", get(http_find_traces))
        .route("/api/traces/{trace_id}", get(http_get_trace))
        .route("/api/dependencies", get(http_dependencies))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .on_request(tower_http::trace::DefaultOnRequest::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct Data<T> {
    data: T,
}

type HttpResult<T> = std::result::Result<Json<Data<T>>, HttpError>;

#[derive(Debug)]
pub struct HttpError(TraceHouseError);

impl From<TraceHouseError> for HttpError {
    fn from(err: TraceHouseError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let body = json!({
            "errors": [{ "code": status.as_u16(), "msg": self.0.to_string() }]
        });
        (status, Json(body)).into_response()
    }
}

pub fn status_for(err: &TraceHouseError) -> StatusCode {
    match err {
        TraceHouseError::NotFound { .. } => StatusCode::NOT_FOUND,
        TraceHouseError::MissingStartTime
        | TraceHouseError::InvalidIdentifier { .. }
        | TraceHouseError::InvalidArgument(_)
        | TraceHouseError::Parse(_) => StatusCode::BAD_REQUEST,
        TraceHouseError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        TraceHouseError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        TraceHouseError::Decode(_)
        | TraceHouseError::Store(_)
        | TraceHouseError::Config(_)
        | TraceHouseError::Io(_)
        | TraceHouseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn data<T>(value: T) -> Json<Data<T>> {
    Json(Data { data: value })
}

async fn http_services(State(state): State<QueryState>) -> HttpResult<Vec<String>> {
    let (reader, ctx, span) = state.begin("services");
    let services = reader.list_services(&ctx).instrument(span).await?;
    Ok(data(services))
}

async fn http_operations(
    State(state): State<QueryState>,
    Path(service): Path<String>,
) -> HttpResult<Vec<String>> {
    let (reader, ctx, span) = state.begin("operations");
    let operations = reader.list_operations(&ctx, &service).instrument(span).await?;
    Ok(data(operations))
}

async fn http_get_trace(
    State(state): State<QueryState>,
    Path(trace_id): Path<String>,
) -> HttpResult<Vec<Trace>> {
    let trace_id = TraceId::parse(&trace_id)?;
    let (reader, ctx, span) = state.begin("trace");
    let trace = reader.get_trace(&ctx, trace_id).instrument(span).await?;
    Ok(data(vec![trace]))
}

/// Query string of `GET /api/traces`. Times are Unix microseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesQuery {
    service: Option<String>,
    operation: Option<String>,
    tags: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
    min_duration: Option<String>,
    max_duration: Option<String>,
    limit: Option<usize>,
}

impl TracesQuery {
    fn into_search(self) -> Result<(SearchOptions, SearchWindow)> {
        let mut options = SearchOptions::for_service(self.service.unwrap_or_default());
        options.operation_name = self.operation.filter(|op| !op.is_empty());
        if let Some(tags) = self.tags.filter(|t| !t.is_empty()) {
            let tags: serde_json::Map<String, Value> = serde_json::from_str(&tags)
                .map_err(|e| TraceHouseError::InvalidArgument(format!("malformed tags: {e}")))?;
            options.tags = tags
                .into_iter()
                .map(|(key, value)| match value {
                    Value::String(value) => Ok(TagFilter::new(key, value)),
                    other => Err(TraceHouseError::InvalidArgument(format!(
                        "tag {key} must be a string, got {other}"
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(min) = self.min_duration {
            options.duration_min = duration_to_nanos(parse_duration_str(&min)?)?;
        }
        if let Some(max) = self.max_duration {
            options.duration_max = duration_to_nanos(parse_duration_str(&max)?)?;
        }
        if let Some(limit) = self.limit {
            options.limit = limit;
        }
        let window = SearchWindow {
            start_min: self.start.map(from_unix_micros).transpose()?,
            start_max: self.end.map(from_unix_micros).transpose()?,
        };
        Ok((options, window))
    }
}

async fn http_find_traces(
    State(state): State<QueryState>,
    Query(query): Query<TracesQuery>,
) -> HttpResult<Vec<Trace>> {
    let (options, window) = query.into_search()?;
    let (reader, ctx, span) = state.begin("find");
    let traces = reader
        .find_traces(&ctx, &options, &window)
        .instrument(span)
        .await?;
    Ok(data(traces))
}

/// `endTs` and `lookback` in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependenciesQuery {
    end_ts: Option<i64>,
    lookback: Option<i64>,
}

async fn http_dependencies(
    State(state): State<QueryState>,
    Query(query): Query<DependenciesQuery>,
) -> HttpResult<Vec<DependencyLink>> {
    let end = match query.end_ts {
        Some(ms) => from_unix_micros(ms.saturating_mul(1000))?,
        None => Utc::now(),
    };
    let lookback_ms = query.lookback.unwrap_or(24 * 60 * 60 * 1000);
    let lookback = TimeDelta::try_milliseconds(lookback_ms).ok_or_else(|| {
        TraceHouseError::InvalidArgument(format!("lookback of {lookback_ms}ms is out of range"))
    })?;
    let (reader, ctx, span) = state.begin("dependencies");
    let links = reader
        .get_dependencies(&ctx, end, lookback)
        .instrument(span)
        .await?;
    Ok(data(links))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use testkit::{SERVICE_CLIENT, SERVICE_SERVER, TRACE_ID_CLIENT, fixture_rows};
    use tracehouse_core::error::ErrorKind;
    use tracehouse_store::MemoryStore;

    use super::*;
    use crate::client::QueryClient;

    fn state() -> QueryState {
        let store = MemoryStore::new(fixture_rows(Utc::now() - TimeDelta::minutes(5)));
        QueryState::new(TraceReader::new(Arc::new(store)), Duration::from_secs(5))
    }

    async fn serve_http(state: QueryState) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await });
        addr
    }

    #[tokio::test]
    async fn ndjson_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_tcp_loop(listener, state()));

        let mut client = QueryClient::connect(None, Some(addr.to_string()))
            .await
            .unwrap();
        let response = client.request(&ApiRequest::Services).await.unwrap();
        assert_eq!(
            response,
            ApiResponse::Services(vec![SERVICE_CLIENT.to_string(), SERVICE_SERVER.to_string()])
        );

        let response = client
            .request(&ApiRequest::Traces {
                trace_ids: vec!["not-hex".to_string()],
            })
            .await
            .unwrap();
        assert!(matches!(
            response,
            ApiResponse::Error {
                kind: ErrorKind::InvalidIdentifier,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn find_without_start_reports_missing_start_time() {
        let response = handle_request(
            ApiRequest::Find(FindRequest {
                options: SearchOptions::for_service(SERVICE_CLIENT),
                window: SearchWindow::default(),
                ids_only: true,
            }),
            &state(),
        )
        .await;
        assert!(matches!(
            response,
            ApiResponse::Error {
                kind: ErrorKind::MissingStartTime,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn http_wraps_results_in_data() {
        let addr = serve_http(state()).await;
        let body: serde_json::Value = reqwest::get(format!("http://{addr}/api/traces/{TRACE_ID_CLIENT}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["data"][0]["spans"].as_array().unwrap().len(), 2);

        let start = (Utc::now() - TimeDelta::hours(1)).timestamp_micros();
        let url = format!(
            "http://{addr}/api/traces?service={SERVICE_SERVER}&start={start}&tags=%7B%22attr-1%22%3A%22value-1%22%7D"
        );
        let body: serde_json::Value = reqwest::get(url).await.unwrap().json().await.unwrap();
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn http_maps_error_kinds_to_status() {
        let addr = serve_http(state()).await;

        let resp = reqwest::get(format!("http://{addr}/api/traces/00000000000000000000000000000abc"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["errors"][0]["code"], 404);

        let resp = reqwest::get(format!("http://{addr}/api/traces?service={SERVICE_CLIENT}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = reqwest::get(format!("http://{addr}/api/traces/xyz")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_lookback_is_an_invalid_argument() {
        let response = handle_request(
            ApiRequest::Dependencies {
                end_time: None,
                lookback_secs: i64::MAX,
            },
            &state(),
        )
        .await;
        assert!(matches!(
            response,
            ApiResponse::Error {
                kind: ErrorKind::InvalidArgument,
                ..
            }
        ));

        let addr = serve_http(state()).await;
        let resp = reqwest::get(format!("http://{addr}/api/dependencies?lookback={}", i64::MIN))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = reqwest::get(format!("http://{addr}/api/dependencies?lookback=3600000"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }

    #[test]
    fn http_tags_keep_their_query_order() {
        let query = TracesQuery {
            service: Some(SERVICE_SERVER.to_string()),
            tags: Some(r#"{"b":"2","a":"1","c":"3"}"#.to_string()),
            ..TracesQuery::default()
        };
        let (options, _) = query.into_search().unwrap();
        let keys = options.tags.iter().map(|t| t.key.as_str()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["b", "a", "c"]);

        let query = TracesQuery {
            tags: Some(r#"{"status":500}"#.to_string()),
            ..TracesQuery::default()
        };
        assert!(matches!(
            query.into_search(),
            Err(TraceHouseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn store_failures_are_server_errors() {
        assert_eq!(
            status_for(&TraceHouseError::DeadlineExceeded("fetch_spans".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&TraceHouseError::Cancelled("search".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&TraceHouseError::Decode("bad events".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
