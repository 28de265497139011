//! Storage trait definitions.

use crate::error::StorageResult;
use crate::layout::NodeLayout;
use crate::segment::Segment;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use shoal_core::{Checksum, Node, NodeId};
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// How [`BlobStore::import_file`] takes ownership of a source file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImportMode {
    /// Leave the source in place.
    Copy,
    /// Rename the source, falling back to copy and delete across filesystems.
    Move,
}

/// Size and checksum of streamed bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileDigest {
    pub size: u64,
    pub checksum: Checksum,
}

/// Node file storage.
///
/// Paths handed to these methods come from [`BlobStore::layout`] or from a
/// validated server-local ingestion path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Directory layout for node files.
    fn layout(&self) -> &NodeLayout;

    /// Fresh path in the staging directory for in-flight uploads.
    fn temp_path(&self) -> PathBuf;

    /// Create the node directory and its `idx/` subdirectory.
    async fn create_node_dir(&self, id: &NodeId) -> StorageResult<()>;

    /// Atomically write the node's JSON snapshot, recreating its directory if needed.
    async fn write_snapshot(&self, node: &Node) -> StorageResult<()>;

    async fn read_snapshot(&self, id: &NodeId) -> StorageResult<Node>;

    /// Remove the node directory and everything in it.
    async fn remove_node_dir(&self, id: &NodeId) -> StorageResult<()>;

    /// Place `src` at `dest` (atomically for copies).
    async fn import_file(&self, src: &Path, dest: &Path, mode: ImportMode) -> StorageResult<()>;

    async fn remove_file(&self, path: &Path) -> StorageResult<()>;

    async fn remove_dir(&self, path: &Path) -> StorageResult<()>;

    async fn exists(&self, path: &Path) -> StorageResult<bool>;

    /// Stream `path` once to compute its size and checksum.
    async fn digest_file(&self, path: &Path) -> StorageResult<FileDigest>;

    /// Stream a concatenation once to compute its size and checksum.
    async fn digest_segments(&self, segments: Vec<Segment>) -> StorageResult<FileDigest>;

    /// Stream the concatenation of `segments` in order.
    async fn read_segments(&self, segments: Vec<Segment>) -> StorageResult<ByteStream>;

    /// Get the backend name for logging/metrics.
    fn backend_name(&self) -> &'static str;

    /// Check that the storage root is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}
