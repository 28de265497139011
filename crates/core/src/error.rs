//! Error types for the core domain.

use std::path::PathBuf;
use thiserror::Error;

/// Core domain error type.
///
/// Readers, indexers and the query engine return these kinds unwrapped so
/// callers can tell a malformed request from a corrupt file.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("truncated index file {path}: {len} bytes is not a multiple of 16")]
    TruncatedIndex { path: PathBuf, len: u64 },

    #[error("unrecognized sequence format")]
    UnrecognizedFormat,

    #[error("truncated record at offset {offset}")]
    TruncatedRecord { offset: u64 },

    #[error("mismatched record id at offset {offset}: {header} != {separator}")]
    MismatchedId {
        offset: u64,
        header: String,
        separator: String,
    },

    #[error("sequence and quality lengths differ at offset {offset}: {seq} != {qual}")]
    LengthMismatch { offset: u64, seq: usize, qual: usize },

    #[error("invalid record at offset {offset}: {reason}")]
    InvalidRecord { offset: u64, reason: String },

    #[error("row {row} has fewer than {column} columns")]
    ColumnOutOfRange { row: u64, column: usize },

    #[error("subset ids must be strictly increasing: {value} follows {previous}")]
    UnsortedOrDuplicate { previous: u64, value: u64 },

    #[error("subset id {value} outside parent index of {len} records")]
    ParentIndexOutOfRange { value: u64, len: u64 },

    #[error("invalid subset id list: {0}")]
    InvalidSubsetList(String),

    #[error("position {position} is past the end of the index ({len} units)")]
    IndexOutOfBounds { position: u64, len: u64 },

    #[error("invalid part specifier: {0}")]
    InvalidPartSpecifier(String),

    #[error("part {spec} out of range for index of {len} records")]
    PartOutOfRange { spec: String, len: u64 },

    #[error("malformed index record {position}: {reason}")]
    MalformedIndex { position: u64, reason: String },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index is empty")]
    EmptyIndex,

    #[error("invalid index type: {0}")]
    InvalidIndexType(String),

    #[error("invalid expiration: {0}")]
    InvalidExpiration(String),

    #[error("external indexer failed: {0}")]
    ExternalTool(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
