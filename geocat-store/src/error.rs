//! Error types for the index store

use geocat_core::{CoreError, VersionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Version does not exist in the store
    #[error("Version not found: {0}")]
    NotFound(String),

    /// Version id was already used by an earlier publish
    #[error("Version already exists: {0}")]
    VersionExists(VersionId),

    /// Version is current or being written and may not be deleted
    #[error("Version is protected from deletion: {0}")]
    Protected(VersionId),

    /// Backing storage cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data failed checksum or structural validation
    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    /// Column file encoding/decoding error
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }
}

impl From<postcard::Error> for StoreError {
    fn from(e: postcard::Error) -> Self {
        Self::Codec(e.to_string())
    }
}
