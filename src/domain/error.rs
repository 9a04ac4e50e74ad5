// Error taxonomy shared by every layer
use thiserror::Error;

/// Failure categories a series view can run into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Configuration,
    TransientFetch,
    DataShape,
    Persistence,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrendError {
    /// No bound query, or the bound query is missing/disabled. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Remote execution and its fallback both failed.
    #[error("fetch failed: {0}")]
    TransientFetch(String),

    /// Response arrived but could not be turned into samples.
    #[error("unexpected data shape: {0}")]
    DataShape(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl TrendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TrendError::Configuration(_) => ErrorKind::Configuration,
            TrendError::TransientFetch(_) => ErrorKind::TransientFetch,
            TrendError::DataShape(_) => ErrorKind::DataShape,
            TrendError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}

/// Errors raised by a durable key/value backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage capacity exceeded writing {key}: {required} bytes needed, quota {quota}")]
    Capacity {
        key: String,
        required: usize,
        quota: usize,
    },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<StoreError> for TrendError {
    fn from(e: StoreError) -> Self {
        TrendError::Persistence(e.to_string())
    }
}
