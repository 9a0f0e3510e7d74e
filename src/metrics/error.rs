//! Metrics error types.

use thiserror::Error;

/// Errors that can occur during metrics calculations.
#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;
