use std::path::Path;
use std::time::Duration;

use duckdb::DuckdbConnectionManager;
use tracehouse_core::config::Config;
use tracehouse_core::error::{Result, TraceHouseError};

pub type ConnectionPool = r2d2::Pool<DuckdbConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<DuckdbConnectionManager>;

/// How long a caller waits for a free connection before the checkout fails.
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_open: usize,
    /// Connections kept open while nothing is running. r2d2 holds at least
    /// this many; anything above it is closed after `max_idle_time`.
    pub max_idle: usize,
    /// `None` or zero: connections are never retired for age.
    pub max_lifetime: Option<Duration>,
    pub max_idle_time: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_open: 8,
            max_idle: 4,
            max_lifetime: None,
            max_idle_time: Some(Duration::from_secs(300)),
        }
    }
}

impl From<&Config> for PoolOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_open: cfg.max_open_conns,
            max_idle: cfg.max_idle_conns,
            max_lifetime: cfg.conn_max_lifetime,
            max_idle_time: cfg.conn_max_idle_time,
        }
    }
}

impl PoolOptions {
    pub fn open_file(&self, path: &Path) -> Result<ConnectionPool> {
        let manager = DuckdbConnectionManager::file(path)
            .map_err(|e| TraceHouseError::Store(format!("failed to open duckdb: {e}")))?;
        self.build(manager)
    }

    /// Every connection is cloned from one in-memory database, so they all
    /// see the same tables.
    pub fn open_in_memory(&self) -> Result<ConnectionPool> {
        let manager = DuckdbConnectionManager::memory()
            .map_err(|e| TraceHouseError::Store(format!("failed to open in-memory db: {e}")))?;
        self.build(manager)
    }

    fn build(&self, manager: DuckdbConnectionManager) -> Result<ConnectionPool> {
        if self.max_open == 0 {
            return Err(TraceHouseError::Config(
                "connection pool needs max_open of at least 1".to_string(),
            ));
        }
        let max_size = u32::try_from(self.max_open)
            .map_err(|_| TraceHouseError::Config(format!("max_open {} is too large", self.max_open)))?;
        let min_idle = u32::try_from(self.max_idle.min(self.max_open)).unwrap_or(max_size);

        r2d2::Pool::builder()
            .max_size(max_size)
            .min_idle(Some(min_idle))
            .max_lifetime(self.max_lifetime.filter(|d| !d.is_zero()))
            .idle_timeout(self.max_idle_time.filter(|d| !d.is_zero()))
            .connection_timeout(CHECKOUT_TIMEOUT)
            .build(manager)
            .map_err(|e| TraceHouseError::Store(format!("failed to build connection pool: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
}

impl PoolStatus {
    pub fn of(pool: &ConnectionPool) -> Self {
        let state = pool.state();
        let open = state.connections as usize;
        let idle = state.idle_connections as usize;
        Self {
            open,
            idle,
            in_use: open.saturating_sub(idle),
        }
    }
}

/// Checks out a connection without blocking the async runtime.
pub async fn checkout(pool: &ConnectionPool) -> Result<PooledConnection> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || pool.get())
        .await
        .map_err(|e| TraceHouseError::Internal(format!("connection checkout task failed: {e}")))?
        .map_err(|e| TraceHouseError::Store(format!("connection checkout failed: {e}")))
}
