//! Node service error types.

use shoal_core::NodeId;
use shoal_metadata::MetadataError;
use shoal_storage::StorageError;
use thiserror::Error;

/// Node service errors.
///
/// Lower-layer errors are wrapped with their kind intact; callers match on
/// `Core`, `Storage` and `Metadata` to tell integrity failures from I/O.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("node {0} already has a file and it cannot be replaced")]
    FileImmutable(NodeId),

    #[error("node {0} already has attributes and they cannot be replaced")]
    AttributesImmutable(NodeId),

    #[error("node {0} already has a parent linkage")]
    ParentLinkageImmutable(NodeId),

    #[error("file format of node {id} is already set to {format}")]
    FormatImmutable { id: NodeId, format: String },

    #[error("timed out waiting for the lock on node {0}")]
    LockTimeout(NodeId),

    #[error("file of node {0} is locked")]
    FileLocked(NodeId),

    #[error("index {index} of node {id} is locked")]
    IndexLocked { id: NodeId, index: String },

    #[error("node {id} is referenced by virtual node(s) {}", .referenced_by.join(", "))]
    NodeReferenced {
        id: NodeId,
        referenced_by: Vec<String>,
    },

    #[error("remote fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Core(#[from] shoal_core::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Whether this error means the addressed thing does not exist, at any layer.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Storage(StorageError::NotFound(_))
                | Self::Metadata(MetadataError::NotFound(_))
                | Self::Core(shoal_core::Error::IndexNotFound(_))
        )
    }
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Fetch(err.to_string())
    }
}

/// Result type for node operations.
pub type NodeResult<T> = std::result::Result<T, NodeError>;
