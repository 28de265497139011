//! Node file storage for shoal.
//!
//! This crate provides:
//! - The sharded on-disk layout of node directories
//! - Atomic snapshot and file writes
//! - Segment streaming for virtual and subset nodes
//! - A local filesystem backend

pub mod backends;
pub mod error;
pub mod layout;
pub mod segment;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use layout::{NodeLayout, resolve_local_path, validate_name};
pub use segment::Segment;
pub use traits::{BlobStore, ByteStream, FileDigest, ImportMode};

use shoal_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path, .. } => {
            let backend = FilesystemBackend::new(path, config.temp_dir()).await?;
            Ok(Arc::new(backend))
        }
    }
}
