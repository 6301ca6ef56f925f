mod client;
mod output;
mod protocol;
mod query_server;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use tracehouse_core::config::{Config, LogFormat};
use tracehouse_core::filter::{SearchWindow, TagFilter};
use tracehouse_core::ids::TraceIdNormalizer;
use tracehouse_core::query::{DEFAULT_SEARCH_LIMIT, SearchOptions};
use tracehouse_core::time::{duration_to_nanos, parse_duration_str, parse_time_or_relative};
use tracehouse_store::{DuckStore, TraceReader};

use crate::client::QueryClient;
use crate::output::{print_dependencies_human, print_names, print_trace_ids, print_traces_human};
use crate::protocol::{ApiRequest, ApiResponse, FindRequest};
use crate::query_server::QueryState;
use crate::telemetry::{TelemetryConfig, init_cli_tracing, init_serve_tracing, shutdown_tracing};

#[derive(Parser, Debug)]
#[command(name = "tracehouse")]
#[command(about = "Trace query backend over a columnar span store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    uds: Option<PathBuf>,

    #[arg(long, global = true)]
    addr: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Serve trace queries over UDS, TCP and HTTP")]
    Serve(ServeArgs),
    #[command(about = "List services that have spans")]
    Services,
    #[command(about = "List span names recorded for a service")]
    Operations { service: String },
    #[command(about = "Fetch and print traces by id")]
    Trace {
        #[arg(required = true)]
        trace_ids: Vec<String>,
    },
    #[command(about = "Search traces, newest first")]
    Find {
        #[arg(long)]
        service: String,
        #[arg(long)]
        operation: Option<String>,
        #[arg(long = "tag", help = "key=value; ~ prefix for regex, % as wildcard")]
        tags: Vec<String>,
        #[arg(long, default_value = "1h")]
        since: String,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        min_duration: Option<String>,
        #[arg(long)]
        max_duration: Option<String>,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        #[arg(long)]
        ids_only: bool,
    },
    #[command(about = "Service dependency links")]
    Deps {
        #[arg(long)]
        end: Option<String>,
        #[arg(long, default_value = "24h")]
        lookback: String,
    },
}

#[derive(clap::Args, Debug, Default)]
struct ServeArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    db_path: Option<PathBuf>,
    #[arg(long)]
    table: Option<String>,
    #[arg(long)]
    query_tcp_addr: Option<String>,
    #[arg(long)]
    query_http_addr: Option<String>,
    #[arg(long)]
    query_uds_path: Option<PathBuf>,
    #[arg(long)]
    query_timeout: Option<String>,
    #[arg(long)]
    no_pad_trace_ids: bool,
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl ServeArgs {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut cfg = Config::load(self.config.as_deref()).context("load config")?;
        if let Some(v) = &self.db_path {
            cfg.db_path = v.clone();
        }
        if let Some(v) = &self.table {
            cfg.table = v.clone();
        }
        if let Some(v) = &self.query_tcp_addr {
            cfg.query_tcp_addr = v.clone();
        }
        if let Some(v) = &self.query_http_addr {
            cfg.query_http_addr = v.clone();
        }
        if let Some(v) = &self.query_uds_path {
            cfg.uds_path = v.clone();
        }
        if let Some(v) = &self.query_timeout {
            cfg.query_timeout = parse_duration_str(v)?;
        }
        if self.no_pad_trace_ids {
            cfg.pad_trace_ids = false;
        }
        if let Some(v) = self.log_format {
            cfg.log_format = v;
        }
        cfg.validate().context("validate config")?;
        Ok(cfg)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let request = match cli.command {
        Commands::Serve(args) => return run_server(args).await,
        Commands::Services => ApiRequest::Services,
        Commands::Operations { service } => ApiRequest::Operations { service },
        Commands::Trace { trace_ids } => ApiRequest::Traces { trace_ids },
        Commands::Find {
            service,
            operation,
            tags,
            since,
            until,
            min_duration,
            max_duration,
            limit,
            ids_only,
        } => {
            let mut options = SearchOptions::for_service(service);
            options.operation_name = operation;
            options.tags = tags
                .iter()
                .map(|t| TagFilter::parse(t))
                .collect::<tracehouse_core::Result<Vec<_>>>()?;
            options.duration_min = parse_nanos(min_duration)?;
            options.duration_max = parse_nanos(max_duration)?;
            options.limit = limit;
            ApiRequest::Find(FindRequest {
                options,
                window: SearchWindow::new(
                    parse_time_or_relative(&since)?,
                    until.map(|v| parse_time_or_relative(&v)).transpose()?,
                ),
                ids_only,
            })
        }
        Commands::Deps { end, lookback } => ApiRequest::Dependencies {
            end_time: end.map(|v| parse_time_or_relative(&v)).transpose()?,
            lookback_secs: i64::try_from(parse_duration_str(&lookback)?.as_secs())
                .context("lookback is too large")?,
        },
    };

    init_cli_tracing();
    let mut client = QueryClient::connect(cli.uds, cli.addr).await?;
    let response = client.request(&request).await?;
    print_response(response, cli.json)
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let cfg = args.load_config()?;
    init_serve_tracing(&TelemetryConfig::from_config(&cfg));

    let store = DuckStore::from_config(&cfg).context("open span store")?;
    let reader = TraceReader::new(Arc::new(store))
        .with_normalizer(TraceIdNormalizer::new(cfg.pad_trace_ids));
    let state = QueryState::new(reader, cfg.query_timeout);

    eprintln!("tracehouse serve");
    eprintln!("  db: {} (table {})", cfg.db_path.display(), cfg.table);
    eprintln!("  query uds: {}", cfg.uds_path.display());
    eprintln!("  query tcp: {}", cfg.query_tcp_addr);
    eprintln!("  query http: {}", cfg.query_http_addr);
    tracing::info!(
        pad_trace_ids = cfg.pad_trace_ids,
        query_timeout = %humantime::format_duration(cfg.query_timeout),
        max_open_conns = cfg.max_open_conns,
        "query server starting"
    );

    let query_task = tokio::spawn(query_server::run_query_server(
        state.clone(),
        cfg.uds_path.clone(),
        cfg.query_tcp_addr.parse().context("parse query tcp addr")?,
    ));
    let query_http_task = tokio::spawn(query_server::run_query_http_server(
        state,
        cfg.query_http_addr.parse().context("parse query http addr")?,
    ));

    let result = tokio::select! {
        res = query_task => res.context("query server task").and_then(|r| r),
        res = query_http_task => res.context("query http task").and_then(|r| r),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
            Ok(())
        }
    };

    shutdown_tracing();
    result
}

fn parse_nanos(value: Option<String>) -> anyhow::Result<i64> {
    match value {
        Some(v) => Ok(duration_to_nanos(parse_duration_str(&v)?)?),
        None => Ok(0),
    }
}

fn print_response(response: ApiResponse, json: bool) -> anyhow::Result<()> {
    if let ApiResponse::Error { kind, message } = &response {
        eprintln!("{} {message}", "error:".red().bold());
        anyhow::bail!("query failed ({kind:?})");
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response {
        ApiResponse::Services(v) => print_names(&v, "services"),
        ApiResponse::Operations(v) => print_names(&v, "operations"),
        ApiResponse::Traces(v) => print_traces_human(&v),
        ApiResponse::TraceIds(v) => print_trace_ids(&v),
        ApiResponse::Dependencies(v) => print_dependencies_human(&v),
        ApiResponse::Error { .. } => {}
    }
    Ok(())
}
