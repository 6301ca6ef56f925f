use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracehouse_core::error::{ErrorKind, TraceHouseError};
use tracehouse_core::filter::SearchWindow;
use tracehouse_core::model::trace::{DependencyLink, Trace};
use tracehouse_core::query::SearchOptions;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FindRequest {
    pub options: SearchOptions,
    pub window: SearchWindow,
    #[serde(default)]
    pub ids_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ApiRequest {
    Services,
    Operations {
        service: String,
    },
    /// Ids travel as text so malformed ones come back as typed errors.
    Traces {
        trace_ids: Vec<String>,
    },
    Find(FindRequest),
    Dependencies {
        end_time: Option<DateTime<Utc>>,
        lookback_secs: i64,
    },
}

impl ApiRequest {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Services => "services",
            Self::Operations { .. } => "operations",
            Self::Traces { .. } => "traces",
            Self::Find(_) => "find",
            Self::Dependencies { .. } => "dependencies",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ApiResponse {
    Services(Vec<String>),
    Operations(Vec<String>),
    Traces(Vec<Trace>),
    TraceIds(Vec<String>),
    Dependencies(Vec<DependencyLink>),
    Error { kind: ErrorKind, message: String },
}

impl From<TraceHouseError> for ApiResponse {
    fn from(err: TraceHouseError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
