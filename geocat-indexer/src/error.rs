//! Error types for the indexer

use geocat_store::StoreError;
use thiserror::Error;

/// Rebuild-level failures. Problems with individual documents are not
/// errors; they are collected as [`DocumentError`](crate::DocumentError)s.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// The document source could not be listed or read
    #[error("Document source error: {0}")]
    Source(String),

    /// Nothing indexable was found under the root
    #[error("No valid documents found ({errors} document errors)")]
    NoDocuments { errors: usize },

    /// Publishing or retention failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The rebuild was aborted by its cancellation token
    #[error("Rebuild cancelled")]
    Cancelled,

    /// The background worker is gone
    #[error("Rebuild worker has shut down")]
    Shutdown,
}

impl IndexerError {
    pub fn source_failed(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }
}

/// Result type for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;
