//! Error taxonomy of the engine.
//!
//! Validation and compilation failures happen before any store access and are
//! never retried. Execution failures say whether a caller retry makes sense.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::db::StructuredError;

/// One offending field of a widget config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    /// Path of the field, e.g. `measures[1].aggregation`.
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found in a widget config, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// Offending field paths, in the order they were found.
    pub fn fields(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.field.as_str()).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issues: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "invalid widget config: {}", issues.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("sort field '{0}' does not name a selected column (expected dim_<n> or a measure alias)")]
    UnknownSortAlias(String),
    #[error("compiled query has no measures")]
    NoMeasures,
    #[error("field '{0}' has no column to filter on")]
    UnfilterableField(String),
}

#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("query exceeded its {}ms deadline", .0.as_millis())]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected the query: {0}")]
    StoreFault(StructuredError),
    #[error("query cancelled by caller")]
    Cancelled,
}

impl ExecutionError {
    /// Whether the caller may retry (with backoff). The engine never does.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Timeout(_) | ExecutionError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("compilation failed: {0}")]
    Compilation(#[from] CompileError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Execution(e) => e.is_retryable(),
            _ => false,
        }
    }
}
