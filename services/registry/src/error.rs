//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use storage::StorageError;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Malformed digest string
    #[error("digest invalid: {0}")]
    DigestInvalid(String),

    /// Missing or empty content type on a write
    #[error("content type invalid: {0}")]
    ContentTypeInvalid(String),

    /// Malformed or inconsistent `Content-Range` / `Content-Length`
    #[error("content range invalid: {0}")]
    ContentRangeInvalid(&'static str),

    /// Manifest body failed to decode
    #[error("manifest invalid: {0}")]
    ManifestInvalid(String),

    /// A query parameter could not be understood
    #[error("parameter invalid: {0}")]
    ParameterInvalid(&'static str),

    /// Manifest not found
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Repository index not found
    #[error("index unknown: {0}")]
    IndexUnknown(String),

    /// Blob not found
    #[error("blob unknown: {0}")]
    BlobUnknown(String),

    /// No registry endpoint at this path
    #[error("no such endpoint: {0}")]
    RouteUnknown(String),

    /// The endpoint exists but not for this method
    #[error("method not allowed: {0}")]
    Unsupported(axum::http::Method),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Anything else that went wrong inside the registry
    #[error("internal error: {0}")]
    Internal(String),
}

impl RegistryError {
    /// Whether this is the storage backend reporting a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::Storage(err) if err.is_not_found())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::DigestInvalid(_)
            | RegistryError::ContentTypeInvalid(_)
            | RegistryError::ContentRangeInvalid(_)
            | RegistryError::ManifestInvalid(_)
            | RegistryError::ParameterInvalid(_) => StatusCode::BAD_REQUEST,
            RegistryError::ManifestUnknown(_)
            | RegistryError::IndexUnknown(_)
            | RegistryError::BlobUnknown(_)
            | RegistryError::RouteUnknown(_) => StatusCode::NOT_FOUND,
            RegistryError::Unsupported(_) => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::Storage(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            RegistryError::Storage(_) | RegistryError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::DigestInvalid(_) => "DIGEST_INVALID",
            RegistryError::ContentTypeInvalid(_) => "CONTENT_TYPE_INVALID",
            RegistryError::ContentRangeInvalid(_) => "CONTENT_RANGE_INVALID",
            RegistryError::ManifestInvalid(_) => "MANIFEST_INVALID",
            RegistryError::ParameterInvalid(_) => "PARAMETER_INVALID",
            RegistryError::ManifestUnknown(_) => "MANIFEST_UNKNOWN",
            RegistryError::IndexUnknown(_) => "INDEX_UNKNOWN",
            RegistryError::BlobUnknown(_) => "BLOB_UNKNOWN",
            RegistryError::RouteUnknown(_) => "NOT_FOUND",
            RegistryError::Unsupported(_) => "UNSUPPORTED",
            RegistryError::Storage(err) if err.is_not_found() => "NOT_FOUND",
            RegistryError::Storage(_) | RegistryError::Internal(_) => "UNKNOWN",
        }
    }

    /// The message sent to the client. Backend and internal details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            RegistryError::Storage(err) if err.is_not_found() => "not found".to_owned(),
            RegistryError::Storage(_) | RegistryError::Internal(_) => {
                "internal server error".to_owned()
            }
            other => other.to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            RegistryError::Storage(err) if !err.is_not_found() => {
                tracing::error!(error = %err, span_trace = %err.span_trace(), "storage error");
            }
            RegistryError::Internal(_) => tracing::error!(error = %self, "internal error"),
            _ => tracing::debug!(error = %self, %status, "request failed"),
        }

        let body = ErrorBody {
            code: self.error_code().to_owned(),
            message: self.public_message(),
        };

        (status, axum::Json(body)).into_response()
    }
}
