//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::layout::NodeLayout;
use crate::segment::Segment;
use crate::traits::{BlobStore, ByteStream, FileDigest, ImportMode};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use shoal_core::{Checksum, Node, NodeId};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Node files on a local filesystem.
pub struct FilesystemBackend {
    layout: NodeLayout,
    temp_dir: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend, creating the root and staging directories.
    pub async fn new(root: impl AsRef<Path>, temp_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        let temp_dir = temp_dir.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(&temp_dir).await?;
        Ok(Self {
            layout: NodeLayout::new(root),
            temp_dir,
        })
    }

    /// Sibling temp path used for atomic writes.
    fn sibling_temp(path: &Path) -> PathBuf {
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        )
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write `data` to `path` through a synced temp file and a rename.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        self.ensure_parent(path).await?;
        let temp_path = Self::sibling_temp(path);
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            // Ensure data is flushed to disk before rename
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        Ok(result?)
    }

    async fn copy_atomic(&self, src: &Path, dest: &Path) -> StorageResult<()> {
        self.ensure_parent(dest).await?;
        let temp_path = Self::sibling_temp(dest);
        let result = async {
            fs::copy(src, &temp_path).await?;
            fs::File::open(&temp_path).await?.sync_all().await?;
            fs::rename(&temp_path, dest).await
        }
        .await;
        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result.map_err(|e| StorageError::from_io(e, src.display()))
    }
}

/// Stream each segment in turn, failing if a file is shorter than its segment claims.
fn segment_stream(segments: Vec<Segment>) -> ByteStream {
    let stream = async_stream::try_stream! {
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        for segment in segments {
            if segment.length == 0 {
                continue;
            }
            let mut file = fs::File::open(&segment.path)
                .await
                .map_err(|e| StorageError::from_io(e, segment.path.display()))?;
            file.seek(std::io::SeekFrom::Start(segment.offset)).await?;
            let mut remaining = segment.length;
            while remaining > 0 {
                let want = remaining.min(STREAM_CHUNK_SIZE as u64) as usize;
                let n = file.read(&mut buf[..want]).await?;
                if n == 0 {
                    Err(StorageError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!(
                            "{} ended {remaining} bytes before the end of its segment",
                            segment.path.display()
                        ),
                    )))?;
                }
                remaining -= n as u64;
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        }
    };
    Box::pin(stream)
}

async fn digest_stream(mut stream: ByteStream) -> StorageResult<FileDigest> {
    let mut hasher = Checksum::hasher();
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        hasher.update(&chunk);
    }
    Ok(FileDigest {
        size,
        checksum: hasher.finalize(),
    })
}

#[async_trait]
impl BlobStore for FilesystemBackend {
    fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    fn temp_path(&self) -> PathBuf {
        self.temp_dir.join(Uuid::new_v4().to_string())
    }

    #[instrument(skip(self), fields(backend = "filesystem", node_id = %id))]
    async fn create_node_dir(&self, id: &NodeId) -> StorageResult<()> {
        fs::create_dir_all(self.layout.index_dir(id)).await?;
        Ok(())
    }

    #[instrument(skip(self, node), fields(backend = "filesystem", node_id = %node.id))]
    async fn write_snapshot(&self, node: &Node) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(node)?;
        self.write_atomic(&self.layout.snapshot_path(&node.id), &data)
            .await
    }

    #[instrument(skip(self), fields(backend = "filesystem", node_id = %id))]
    async fn read_snapshot(&self, id: &NodeId) -> StorageResult<Node> {
        let data = fs::read(self.layout.snapshot_path(id))
            .await
            .map_err(|e| StorageError::from_io(e, id))?;
        Ok(serde_json::from_slice(&data)?)
    }

    #[instrument(skip(self), fields(backend = "filesystem", node_id = %id))]
    async fn remove_node_dir(&self, id: &NodeId) -> StorageResult<()> {
        match fs::remove_dir_all(self.layout.node_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn import_file(&self, src: &Path, dest: &Path, mode: ImportMode) -> StorageResult<()> {
        match mode {
            ImportMode::Copy => self.copy_atomic(src, dest).await,
            ImportMode::Move => {
                self.ensure_parent(dest).await?;
                match fs::rename(src, dest).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(StorageError::NotFound(src.display().to_string()))
                    }
                    Err(e) => {
                        debug!(error = %e, "rename failed, copying instead");
                        self.copy_atomic(src, dest).await?;
                        fs::remove_file(src).await?;
                        Ok(())
                    }
                }
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn remove_file(&self, path: &Path) -> StorageResult<()> {
        fs::remove_file(path)
            .await
            .map_err(|e| StorageError::from_io(e, path.display()))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn remove_dir(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn exists(&self, path: &Path) -> StorageResult<bool> {
        fs::try_exists(path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn digest_file(&self, path: &Path) -> StorageResult<FileDigest> {
        let len = fs::metadata(path)
            .await
            .map_err(|e| StorageError::from_io(e, path.display()))?
            .len();
        digest_stream(segment_stream(vec![Segment::whole(path, len)])).await
    }

    #[instrument(skip(self, segments), fields(backend = "filesystem", segments = segments.len()))]
    async fn digest_segments(&self, segments: Vec<Segment>) -> StorageResult<FileDigest> {
        digest_stream(segment_stream(segments)).await
    }

    #[instrument(skip(self, segments), fields(backend = "filesystem", segments = segments.len()))]
    async fn read_segments(&self, segments: Vec<Segment>) -> StorageResult<ByteStream> {
        // Fail before streaming starts when a file is missing.
        for segment in &segments {
            if !fs::try_exists(&segment.path).await? {
                return Err(StorageError::NotFound(segment.path.display().to_string()));
            }
        }
        Ok(segment_stream(segments))
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        // Verify the root directory exists and is accessible
        let root = self.layout.root();
        let metadata = fs::metadata(root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", root),
            )));
        }

        Ok(())
    }
}
