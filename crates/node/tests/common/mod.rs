//! Shared fixtures for node service integration tests.

#![allow(dead_code)]

use futures::TryStreamExt;
use shoal_core::Node;
use shoal_core::config::AppConfig;
use shoal_node::{DownloadPlan, NodeService, UpdateRequest, UploadedFile};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// A node service over a throwaway directory.
pub struct TestNodes {
    pub service: NodeService,
    pub config: AppConfig,
    dir: TempDir,
    counter: AtomicUsize,
}

impl TestNodes {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::for_testing(dir.path());
        adjust(&mut config);
        let service = NodeService::from_config(&config).await.unwrap();
        Self {
            service,
            config,
            dir,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write `data` to a fresh staging file, as the transport layer would.
    pub fn stage(&self, name: &str, data: &[u8]) -> UploadedFile {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let staging = self.dir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let path: PathBuf = staging.join(format!("upload-{n}"));
        std::fs::write(&path, data).unwrap();
        UploadedFile::new(name, path)
    }

    /// Create a node with `data` uploaded as its file.
    pub async fn upload(&self, name: &str, data: &[u8]) -> Node {
        let request = UpdateRequest::new().file("upload", self.stage(name, data));
        self.service.create(Some("alice"), request).await.unwrap()
    }

    /// Read the bytes a download plan streams.
    pub async fn read_plan(&self, plan: &DownloadPlan) -> Vec<u8> {
        let stream = self.service.open_download(plan).await.unwrap();
        let chunks: Vec<_> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    /// Whole-file download of a node.
    pub async fn download(&self, node: &Node) -> Vec<u8> {
        let plan = self.service.plan_download(node, None).await.unwrap();
        self.read_plan(&plan).await
    }
}

/// FASTA with `records` records of varying length; returns the data and
/// the `(offset, length)` of every record.
pub fn fasta(records: usize) -> (Vec<u8>, Vec<(u64, u64)>) {
    let mut data = Vec::new();
    let mut spans = Vec::with_capacity(records);
    for i in 0..records {
        let start = data.len() as u64;
        let seq = "ACGTTGCAAC".repeat(4 + i % 13);
        data.extend_from_slice(format!(">read_{i} sample\n{seq}\n").as_bytes());
        spans.push((start, data.len() as u64 - start));
    }
    (data, spans)
}

/// FASTA of at least `size` bytes.
pub fn fasta_of_size(size: usize) -> (Vec<u8>, Vec<(u64, u64)>) {
    let (mut data, mut spans) = (Vec::new(), Vec::new());
    let mut i = 0usize;
    while data.len() < size {
        let start = data.len() as u64;
        let seq = "ACGTTGCAAC".repeat(4 + i % 13);
        data.extend_from_slice(format!(">read_{i} sample\n{seq}\n").as_bytes());
        spans.push((start, data.len() as u64 - start));
        i += 1;
    }
    (data, spans)
}

/// FASTQ with `records` well-formed records.
pub fn fastq(records: usize) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..records {
        let seq = "ACGT".repeat(5 + i % 3);
        let qual = "I".repeat(seq.len());
        data.extend_from_slice(format!("@q{i}\n{seq}\n+\n{qual}\n").as_bytes());
    }
    data
}

/// Bytes of `data` covered by a record span.
pub fn span<'a>(data: &'a [u8], (offset, length): (u64, u64)) -> &'a [u8] {
    &data[offset as usize..(offset + length) as usize]
}
