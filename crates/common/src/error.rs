use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid periods, risk fractions or ratios. Raised before evaluation starts.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Insufficient history: need {required} bars, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Data gap: expected bar at {expected}, got {actual} ({missing} missing)")]
    DataGap {
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
        missing: usize,
    },

    #[error("Out-of-order bar: {actual} is not after {last}")]
    OutOfOrder {
        last: DateTime<Utc>,
        actual: DateTime<Utc>,
    },

    #[error("Signal rejected: {0}")]
    Rejected(RejectionReason),

    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
