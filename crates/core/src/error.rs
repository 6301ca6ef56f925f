use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceHouseError {
    #[error("start time is required for search queries")]
    MissingStartTime,

    #[error("trace not found: {trace_id}")]
    NotFound { trace_id: String },

    #[error("invalid {kind} id: {value:?}")]
    InvalidIdentifier { kind: IdKind, value: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("query cancelled: {0}")]
    Cancelled(String),

    #[error("query deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TraceHouseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Trace,
    Span,
    ParentSpan,
}

impl std::fmt::Display for IdKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IdKind::Trace => "trace",
            IdKind::Span => "span",
            IdKind::ParentSpan => "parent span",
        })
    }
}

/// Coarse classification the serving layer maps onto wire status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingStartTime,
    NotFound,
    InvalidIdentifier,
    Decode,
    Store,
    InvalidArgument,
    Internal,
}

impl TraceHouseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingStartTime => ErrorKind::MissingStartTime,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Store(_) | Self::Cancelled(_) | Self::DeadlineExceeded(_) => ErrorKind::Store,
            Self::InvalidArgument(_) | Self::Parse(_) => ErrorKind::InvalidArgument,
            Self::Config(_) | Self::Io(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid_id(kind: IdKind, value: impl Into<String>) -> Self {
        Self::InvalidIdentifier {
            kind,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_a_store_error() {
        assert_eq!(
            TraceHouseError::Cancelled("find_trace_ids".into()).kind(),
            ErrorKind::Store
        );
        assert_eq!(
            TraceHouseError::DeadlineExceeded("fetch_spans".into()).kind(),
            ErrorKind::Store
        );
    }

    #[test]
    fn invalid_id_message_names_the_value() {
        let err = TraceHouseError::invalid_id(IdKind::ParentSpan, "zz");
        assert_eq!(err.to_string(), "invalid parent span id: \"zz\"");
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
    }
}
