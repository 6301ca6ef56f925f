use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceHouseError};

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").expect("static table pattern")
});

pub const DEFAULT_TABLE: &str = "otel_traces";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = TraceHouseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(TraceHouseError::Config(format!(
                "unknown log format {other:?}, expected compact or json"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub table: String,
    pub pad_trace_ids: bool,
    pub query_tcp_addr: String,
    pub query_http_addr: String,
    pub uds_path: PathBuf,
    pub query_timeout: Duration,
    pub max_open_conns: usize,
    pub max_idle_conns: usize,
    pub conn_max_lifetime: Option<Duration>,
    pub conn_max_idle_time: Option<Duration>,
    pub enable_tracing: bool,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let xdg_runtime = env::var("XDG_RUNTIME_DIR").ok();
        let data_home = env::var("XDG_DATA_HOME").ok();

        let data_root = data_home
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(home).join(".local/share"));

        let uds_path = xdg_runtime
            .map(PathBuf::from)
            .unwrap_or_else(|| data_root.join("tracehouse"))
            .join("tracehouse.sock");

        Self {
            db_path: data_root.join("tracehouse/traces.duckdb"),
            table: DEFAULT_TABLE.to_string(),
            pad_trace_ids: true,
            query_tcp_addr: "127.0.0.1:16685".to_string(),
            query_http_addr: "127.0.0.1:16686".to_string(),
            uds_path,
            query_timeout: Duration::from_secs(30),
            max_open_conns: 8,
            max_idle_conns: 4,
            conn_max_lifetime: None,
            conn_max_idle_time: Some(Duration::from_secs(300)),
            enable_tracing: false,
            log_format: LogFormat::Compact,
        }
    }
}

impl Config {
    /// Defaults, then the config file, then `TRACEHOUSE_*` variables.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(config_file_path);
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        } else if explicit_path.is_some() {
            return Err(TraceHouseError::Config(format!(
                "config file {} does not exist",
                config_path.display()
            )));
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        validate_table_name(&self.table)?;
        if self.max_open_conns == 0 {
            return Err(TraceHouseError::Config(
                "max_open_conns must be at least 1".to_string(),
            ));
        }
        if self.max_idle_conns > self.max_open_conns {
            return Err(TraceHouseError::Config(format!(
                "max_idle_conns ({}) exceeds max_open_conns ({})",
                self.max_idle_conns, self.max_open_conns
            )));
        }
        Ok(())
    }
}

/// Table names are interpolated into SQL text, so only plain (optionally
/// schema-qualified) identifiers are accepted.
pub fn validate_table_name(name: &str) -> Result<()> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(TraceHouseError::Config(format!(
            "invalid table name {name:?}: expected [schema.]identifier"
        )))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    table: Option<String>,
    pad_trace_ids: Option<bool>,
    query_tcp_addr: Option<String>,
    query_http_addr: Option<String>,
    uds_path: Option<PathBuf>,
    query_timeout: Option<String>,
    max_open_conns: Option<usize>,
    max_idle_conns: Option<usize>,
    conn_max_lifetime: Option<String>,
    conn_max_idle_time: Option<String>,
    enable_tracing: Option<bool>,
    log_format: Option<String>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("TRACEHOUSE_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("tracehouse/config.toml")
}

fn load_file_overrides(path: &Path) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path).map_err(|e| {
        TraceHouseError::Config(format!("failed reading {}: {e}", path.display()))
    })?;
    let parsed: ConfigOverrides = toml::from_str(&raw).map_err(|e| {
        TraceHouseError::Config(format!("failed parsing {}: {e}", path.display()))
    })?;
    Ok(Some(parsed))
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| TraceHouseError::Config(format!("bad {name} in environment: {e}"))),
        Err(_) => Ok(None),
    }
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    Ok(ConfigOverrides {
        db_path: env::var("TRACEHOUSE_DB_PATH").ok().map(PathBuf::from),
        table: env::var("TRACEHOUSE_TABLE").ok(),
        pad_trace_ids: env_parse("TRACEHOUSE_PAD_TRACE_IDS")?,
        query_tcp_addr: env::var("TRACEHOUSE_QUERY_TCP_ADDR").ok(),
        query_http_addr: env::var("TRACEHOUSE_QUERY_HTTP_ADDR").ok(),
        uds_path: env::var("TRACEHOUSE_QUERY_UDS_PATH").ok().map(PathBuf::from),
        query_timeout: env::var("TRACEHOUSE_QUERY_TIMEOUT").ok(),
        max_open_conns: env_parse("TRACEHOUSE_MAX_OPEN_CONNS")?,
        max_idle_conns: env_parse("TRACEHOUSE_MAX_IDLE_CONNS")?,
        conn_max_lifetime: env::var("TRACEHOUSE_CONN_MAX_LIFETIME").ok(),
        conn_max_idle_time: env::var("TRACEHOUSE_CONN_MAX_IDLE_TIME").ok(),
        enable_tracing: env_parse("TRACEHOUSE_ENABLE_TRACING")?,
        log_format: env::var("TRACEHOUSE_LOG_FORMAT").ok(),
    })
}

fn parse_duration_field(field: &str, value: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        TraceHouseError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}

/// `0` or `off` disables the limit.
fn parse_optional_duration_field(
    field: &str,
    value: &str,
    source: &str,
) -> Result<Option<Duration>> {
    match value.trim() {
        "0" | "off" | "none" => Ok(None),
        v => parse_duration_field(field, v, source).map(Some),
    }
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.table {
        cfg.table = v;
    }
    if let Some(v) = overrides.pad_trace_ids {
        cfg.pad_trace_ids = v;
    }
    if let Some(v) = overrides.query_tcp_addr {
        cfg.query_tcp_addr = v;
    }
    if let Some(v) = overrides.query_http_addr {
        cfg.query_http_addr = v;
    }
    if let Some(v) = overrides.uds_path {
        cfg.uds_path = v;
    }
    if let Some(v) = overrides.query_timeout {
        cfg.query_timeout = parse_duration_field("query_timeout", &v, source)?;
    }
    if let Some(v) = overrides.max_open_conns {
        cfg.max_open_conns = v;
    }
    if let Some(v) = overrides.max_idle_conns {
        cfg.max_idle_conns = v;
    }
    if let Some(v) = overrides.conn_max_lifetime {
        cfg.conn_max_lifetime = parse_optional_duration_field("conn_max_lifetime", &v, source)?;
    }
    if let Some(v) = overrides.conn_max_idle_time {
        cfg.conn_max_idle_time = parse_optional_duration_field("conn_max_idle_time", &v, source)?;
    }
    if let Some(v) = overrides.enable_tracing {
        cfg.enable_tracing = v;
    }
    if let Some(v) = overrides.log_format {
        cfg.log_format = v.parse().map_err(|e| {
            TraceHouseError::Config(format!("bad log_format in {source}: {e}"))
        })?;
    }
    Ok(())
}
