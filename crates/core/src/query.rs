use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceHouseError};
use crate::filter::TagFilter;

pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Criteria for a trace search. The time bounds travel separately as a
/// [`crate::filter::SearchWindow`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchOptions {
    pub service_name: String,
    pub operation_name: Option<String>,
    pub tags: Vec<TagFilter>,
    /// Nanoseconds; zero means unbounded.
    pub duration_min: i64,
    /// Nanoseconds; zero means unbounded.
    pub duration_max: i64,
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            operation_name: None,
            tags: Vec::new(),
            duration_min: 0,
            duration_max: 0,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl SearchOptions {
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service_name: service.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(TraceHouseError::InvalidArgument(
                "service name is required for search queries".to_string(),
            ));
        }
        if self.duration_min < 0 || self.duration_max < 0 {
            return Err(TraceHouseError::InvalidArgument(
                "duration bounds must not be negative".to_string(),
            ));
        }
        if self.duration_max != 0 && self.duration_min > self.duration_max {
            return Err(TraceHouseError::InvalidArgument(format!(
                "min duration {}ns exceeds max duration {}ns",
                self.duration_min, self.duration_max
            )));
        }
        Ok(())
    }
}
