use super::types::{MetadataFilter, ScoredRecord, VectorRecord};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Classified outcome of a failed remote call.
///
/// Connectivity, authentication and timeout failures move the store into
/// degraded mode; a rejection only reroutes the single call.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("connection failed: {0}")]
    Connectivity(String),

    #[error("authentication rejected: {0}")]
    Authentication(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn degrades(&self) -> bool {
        matches!(
            self,
            RemoteError::Connectivity(_) | RemoteError::Authentication(_) | RemoteError::Timeout(_)
        )
    }

    /// Map a non-success HTTP status to its class
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => RemoteError::Authentication(format!("{}: {}", status, body)),
            408 | 429 | 500..=599 => RemoteError::Connectivity(format!("{}: {}", status, body)),
            _ => RemoteError::Rejected {
                status,
                message: body,
            },
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A remote vector database sitting behind [`super::VectorStore`].
#[async_trait]
pub trait RemoteVectorBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Connectivity and credential check
    async fn health_check(&self) -> RemoteResult<()>;

    async fn upsert(&self, record: &VectorRecord) -> RemoteResult<()>;

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> RemoteResult<Vec<ScoredRecord>>;

    async fn delete(&self, id: &str) -> RemoteResult<()>;

    async fn fetch(&self, id: &str) -> RemoteResult<Option<VectorRecord>>;
}
