//! Error types for core model operations

use thiserror::Error;

/// Errors raised while validating documents, bboxes, datetimes and tables
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed or inverted bounding box
    #[error("invalid bbox: {0}")]
    InvalidBbox(String),

    /// Unparseable datetime or datetime range
    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),

    /// Document failed validation
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Table-level invariant violated (dangling reference, duplicate id)
    #[error("table integrity violated: {0}")]
    Integrity(String),

    /// Version identifier could not be parsed
    #[error("invalid version id: {0}")]
    InvalidVersion(String),
}

impl CoreError {
    pub fn invalid_bbox(msg: impl Into<String>) -> Self {
        CoreError::InvalidBbox(msg.into())
    }

    pub fn invalid_datetime(msg: impl Into<String>) -> Self {
        CoreError::InvalidDatetime(msg.into())
    }

    pub fn invalid_document(msg: impl Into<String>) -> Self {
        CoreError::InvalidDocument(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        CoreError::Integrity(msg.into())
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
