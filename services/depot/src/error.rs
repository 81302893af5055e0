//! Error types for the depot

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use storage::StorageError;

/// Result type for depot operations
pub type DepotResult<T> = Result<T, DepotError>;

/// Kinds of rows a lookup can fail to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// An account namespace.
    Account,
    /// A repository within an account.
    Repository,
    /// A blob, or a blob which is not mounted into the requested repository.
    Blob,
    /// A manifest.
    Manifest,
    /// A tag.
    Tag,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Account => "account",
            Resource::Repository => "repository",
            Resource::Blob => "blob",
            Resource::Manifest => "manifest",
            Resource::Tag => "tag",
        })
    }
}

/// Error types for depot operations
#[derive(Debug, thiserror::Error)]
pub enum DepotError {
    /// No account is due for a sweep right now.
    ///
    /// This is the steady state of the sweep scheduler, not a fault.
    #[error("no account is due for a blob sweep")]
    NotDue,

    /// The target row does not exist
    #[error("{resource} not found: {name}")]
    NotFound {
        /// What was looked up
        resource: Resource,
        /// The name or digest which was looked up
        name: String,
    },

    /// The storage backend failed, timed out or was cancelled
    #[error("backend error: {0}")]
    Backend(#[from] StorageError),

    /// Malformed request parameters
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid digest format
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Digest mismatch
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: String,
        /// Actual digest
        actual: String,
    },

    /// Invalid account or repository name
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// A manifest references a blob which is not mounted into its repository
    #[error("manifest references unknown blob: {0}")]
    BlobUnknown(String),

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Unsupported manifest media type
    #[error("unsupported manifest type: {0}")]
    UnsupportedManifestType(String),
}

impl DepotError {
    /// Shorthand for [`DepotError::NotFound`].
    pub fn not_found(resource: Resource, name: impl Into<String>) -> Self {
        DepotError::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Whether this is the "nothing to do right now" condition of the sweep scheduler.
    pub fn is_not_due(&self) -> bool {
        matches!(self, DepotError::NotDue)
    }

    /// Whether the target row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DepotError::NotFound { .. })
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DepotError::NotFound { .. } => StatusCode::NOT_FOUND,
            DepotError::BadRequest(_)
            | DepotError::InvalidDigest(_)
            | DepotError::DigestMismatch { .. }
            | DepotError::InvalidName(_)
            | DepotError::BlobUnknown(_)
            | DepotError::InvalidManifest(_) => StatusCode::BAD_REQUEST,
            DepotError::UnsupportedManifestType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DepotError::Backend(error) if error.is_server_fault() => StatusCode::SERVICE_UNAVAILABLE,
            DepotError::Backend(_) => StatusCode::BAD_GATEWAY,
            DepotError::NotDue => StatusCode::SERVICE_UNAVAILABLE,
            DepotError::Database(_) | DepotError::Io(_) | DepotError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            DepotError::NotFound { resource, .. } => match resource {
                Resource::Blob => "BLOB_UNKNOWN",
                Resource::Manifest | Resource::Tag => "MANIFEST_UNKNOWN",
                Resource::Account | Resource::Repository => "NAME_UNKNOWN",
            },
            DepotError::InvalidDigest(_) | DepotError::DigestMismatch { .. } => "DIGEST_INVALID",
            DepotError::InvalidName(_) => "NAME_INVALID",
            DepotError::BlobUnknown(_) => "MANIFEST_BLOB_UNKNOWN",
            DepotError::InvalidManifest(_) | DepotError::UnsupportedManifestType(_) => {
                "MANIFEST_INVALID"
            }
            DepotError::BadRequest(_) => "BAD_REQUEST",
            DepotError::NotDue
            | DepotError::Backend(_)
            | DepotError::Database(_)
            | DepotError::Io(_)
            | DepotError::Config(_) => "UNKNOWN",
        }
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for DepotError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            DepotError::Backend(error) if error.is_retryable() => {
                tracing::warn!(%error, span_trace = %error.span_trace(), "backend call failed");
            }
            DepotError::Backend(error) => {
                tracing::error!(%error, span_trace = %error.span_trace(), "backend call failed");
            }
            _ if status.is_server_error() => tracing::error!(error = %self, "request failed"),
            _ => {}
        }

        let body = ErrorResponse {
            errors: vec![ErrorDetail {
                code: self.error_code(),
                message: self.to_string(),
            }],
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404_with_resource_code() {
        let err = DepotError::not_found(Resource::Manifest, "sha256:00");
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "MANIFEST_UNKNOWN");
        assert_eq!(err.to_string(), "manifest not found: sha256:00");
    }

    #[test]
    fn backend_errors_are_gateway_failures() {
        let err: DepotError = StorageError::cancelled("memory").into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert!(!err.is_not_found());
    }

    #[test]
    fn unavailable_backend_is_service_unavailable() {
        let err: DepotError =
            StorageError::timed_out("memory", std::time::Duration::from_secs(30)).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_code(), "UNKNOWN");
    }

    #[test]
    fn bad_request_is_client_error() {
        let err = DepotError::BadRequest("limit must be a non-negative integer".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_not_due());
    }
}
