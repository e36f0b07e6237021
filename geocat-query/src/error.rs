//! Query error taxonomy

use geocat_core::CoreError;
use geocat_crs::CrsError;
use geocat_store::StoreError;
use thiserror::Error;

/// Query errors. Cloneable so a single reload result can be handed to every
/// coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Rejected request parameter; never reaches the index
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// No snapshot has ever been loaded
    #[error("Index unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<CrsError> for QueryError {
    fn from(e: CrsError) -> Self {
        if e.is_client_error() {
            QueryError::InvalidInput(e.to_string())
        } else {
            QueryError::Internal(e.to_string())
        }
    }
}

/// Core errors reaching the query layer come from parsing request values.
impl From<CoreError> for QueryError {
    fn from(e: CoreError) -> Self {
        QueryError::InvalidInput(e.to_string())
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        QueryError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
