//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use shoal_metadata::MetadataError;
use shoal_node::NodeError;
use shoal_storage::StorageError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Core(#[from] shoal_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Node(e) => node_code(e),
            Self::Metadata(MetadataError::NotFound(_)) => "not_found",
            Self::Metadata(_) => "metadata_error",
            Self::Core(e) => core_code(e),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Node(e) => node_status(e),
            Self::Metadata(MetadataError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Core(e) => core_status(e),
        }
    }
}

fn node_code(e: &NodeError) -> &'static str {
    match e {
        NodeError::NotFound(_) => "not_found",
        NodeError::InvalidRequest(_) => "invalid_request",
        NodeError::FileImmutable(_) => "file_immutable",
        NodeError::AttributesImmutable(_) => "attributes_immutable",
        NodeError::ParentLinkageImmutable(_) => "parent_linkage_immutable",
        NodeError::FormatImmutable { .. } => "format_immutable",
        NodeError::LockTimeout(_) => "lock_timeout",
        NodeError::FileLocked(_) => "file_locked",
        NodeError::IndexLocked { .. } => "index_locked",
        NodeError::NodeReferenced { .. } => "node_referenced",
        NodeError::Fetch(_) => "fetch_failed",
        NodeError::Core(e) => core_code(e),
        NodeError::Storage(StorageError::NotFound(_)) => "not_found",
        NodeError::Storage(StorageError::InvalidPath(_) | StorageError::InvalidName(_)) => "invalid_request",
        NodeError::Storage(_) => "storage_error",
        NodeError::Metadata(MetadataError::NotFound(_)) => "not_found",
        NodeError::Metadata(_) => "metadata_error",
        NodeError::Io(_) | NodeError::Internal(_) => "internal_error",
    }
}

fn node_status(e: &NodeError) -> StatusCode {
    match e {
        NodeError::NotFound(_) => StatusCode::NOT_FOUND,
        NodeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        NodeError::FileImmutable(_)
        | NodeError::AttributesImmutable(_)
        | NodeError::ParentLinkageImmutable(_)
        | NodeError::FormatImmutable { .. }
        | NodeError::NodeReferenced { .. } => StatusCode::CONFLICT,
        NodeError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        NodeError::FileLocked(_) | NodeError::IndexLocked { .. } => StatusCode::LOCKED,
        NodeError::Fetch(_) => StatusCode::BAD_GATEWAY,
        NodeError::Core(e) => core_status(e),
        NodeError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        NodeError::Storage(StorageError::InvalidPath(_) | StorageError::InvalidName(_)) => StatusCode::BAD_REQUEST,
        NodeError::Metadata(MetadataError::NotFound(_)) => StatusCode::NOT_FOUND,
        NodeError::Storage(_)
        | NodeError::Metadata(_)
        | NodeError::Io(_)
        | NodeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn core_code(e: &shoal_core::Error) -> &'static str {
    use shoal_core::Error;
    match e {
        Error::IndexNotFound(_) => "index_not_found",
        Error::EmptyIndex => "empty_index",
        Error::InvalidPartSpecifier(_) | Error::PartOutOfRange { .. } => "invalid_part",
        Error::UnsortedOrDuplicate { .. }
        | Error::ParentIndexOutOfRange { .. }
        | Error::InvalidSubsetList(_) => "invalid_subset",
        Error::InvalidIndexType(_) => "invalid_index_type",
        Error::InvalidNodeId(_) => "invalid_node_id",
        Error::InvalidExpiration(_) => "invalid_expiration",
        Error::UnrecognizedFormat
        | Error::TruncatedRecord { .. }
        | Error::MismatchedId { .. }
        | Error::LengthMismatch { .. }
        | Error::InvalidRecord { .. }
        | Error::ColumnOutOfRange { .. } => "invalid_content",
        _ => "integrity_error",
    }
}

fn core_status(e: &shoal_core::Error) -> StatusCode {
    match core_code(e) {
        "index_not_found" => StatusCode::NOT_FOUND,
        "integrity_error" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
