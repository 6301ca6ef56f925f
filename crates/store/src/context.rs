use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracehouse_core::error::{Result, TraceHouseError};

/// Per-request deadline and cancellation signal.
///
/// Store calls made through [`RequestContext::run`] race against both. When
/// either fires the call's future is dropped, which interrupts a DuckDB
/// statement still running on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Sender half of a [`RequestContext`] cancellation signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl RequestContext {
    /// No deadline, never cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::default().timeout(timeout)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Attaches a fresh cancellation signal and returns its trigger.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails fast if the request is already cancelled or past its deadline.
    pub fn check(&self, op: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(TraceHouseError::Cancelled(op.to_string()));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(TraceHouseError::DeadlineExceeded(op.to_string()));
        }
        Ok(())
    }

    pub async fn run<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(op)?;

        let cancelled = async {
            match self.cancel.clone() {
                Some(mut rx) => {
                    // A dropped sender can no longer cancel.
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(TraceHouseError::Cancelled(op.to_string())),
            _ = expired => Err(TraceHouseError::DeadlineExceeded(op.to_string())),
            result = fut => result,
        }
    }
}
