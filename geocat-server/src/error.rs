//! Server error types with HTTP status code mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use geocat_crs::CrsError;
use geocat_indexer::IndexerError;
use geocat_query::QueryError;
use serde::Serialize;
use thiserror::Error;

/// Server error type that wraps lower-layer errors and provides HTTP status mapping
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    Query(#[from] QueryError),

    /// Rebuild could not run or did not finish
    #[error("Rebuild failed: {0}")]
    Rebuild(String),

    /// Startup failure loading the CRS registry
    #[error("{0}")]
    Crs(#[from] CrsError),

    /// JSON body parsing error
    #[error("Invalid JSON: {0}")]
    Json(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not possible in the current server configuration
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ServerError::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ServerError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        ServerError::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServerError::Internal(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Query(e) => match e {
                QueryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                QueryError::NotFound(_) => StatusCode::NOT_FOUND,
                QueryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                QueryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Json(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Rebuild(_)
            | ServerError::Crs(_)
            | ServerError::Config(_)
            | ServerError::Io(_)
            | ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code for the response body and request span
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Query(QueryError::InvalidInput(_)) => "InvalidInput",
            ServerError::Query(QueryError::NotFound(_)) | ServerError::NotFound(_) => "NotFound",
            ServerError::Query(QueryError::Unavailable(_)) | ServerError::Unavailable(_) => {
                "IndexUnavailable"
            }
            ServerError::Query(QueryError::Internal(_)) | ServerError::Internal(_) => {
                "InternalError"
            }
            ServerError::Rebuild(_) => "RebuildFailed",
            ServerError::Crs(_) | ServerError::Config(_) => "ConfigurationError",
            ServerError::Json(_) => "InvalidJson",
            ServerError::BadRequest(_) => "BadRequest",
            ServerError::Conflict(_) => "Conflict",
            ServerError::Io(_) => "IoError",
        }
    }
}

impl From<IndexerError> for ServerError {
    fn from(e: IndexerError) -> Self {
        match e {
            IndexerError::Cancelled | IndexerError::Shutdown => {
                ServerError::Unavailable(e.to_string())
            }
            other => ServerError::Rebuild(other.to_string()),
        }
    }
}

/// Response extension carrying [`ServerError::error_type`], read by the
/// request span middleware
#[derive(Debug, Clone, Copy)]
pub struct ErrorCode(pub &'static str);

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error_type, error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error_type, error = %self, "request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
            error_type: error_type.to_string(),
        };

        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"{}","status":{},"type":"{}"}}"#,
                error_type,
                status.as_u16(),
                error_type
            )
        });

        let mut response = (status, [("content-type", "application/json")], json).into_response();
        response.extensions_mut().insert(ErrorCode(error_type));
        response
    }
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_error_status_mapping() {
        let cases = [
            (QueryError::invalid("bbox"), StatusCode::BAD_REQUEST),
            (QueryError::not_found("collection 'x'"), StatusCode::NOT_FOUND),
            (QueryError::unavailable("no index"), StatusCode::SERVICE_UNAVAILABLE),
            (QueryError::Internal("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status_code(), status);
        }
        assert_eq!(
            ServerError::conflict("no catalog root").status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_indexer_error_mapping() {
        let cancelled = ServerError::from(IndexerError::Cancelled);
        assert_eq!(cancelled.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        let empty = ServerError::from(IndexerError::NoDocuments { errors: 3 });
        assert_eq!(empty.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(empty.error_type(), "RebuildFailed");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorResponse {
            error: "Not found: item 'a'".into(),
            status: 404,
            error_type: "NotFound".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "NotFound");
        assert_eq!(json["status"], 404);
    }
}
