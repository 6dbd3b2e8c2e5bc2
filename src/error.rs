use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No record for key '{key}'")]
    NotFound { key: String },

    #[error("Failed to write snapshot to {}: {source}", path.display())]
    PersistenceWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Persisted state at {} is unreadable: {reason}", path.display())]
    PersistenceCorrupt { path: PathBuf, reason: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Expected absence, not a failure of the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Warning-class errors leave the in-memory effect of the operation applied.
    pub fn is_warning(&self) -> bool {
        matches!(self, StoreError::PersistenceWriteFailed { .. })
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
