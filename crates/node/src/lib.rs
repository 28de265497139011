//! Node service for shoal.
//!
//! This crate provides:
//! - The lock manager (node, file and index locks)
//! - The update protocol with its seven upload modes and metadata side channels
//! - Parts assembly, URL fetch and local path ingestion
//! - Asynchronous index builds reported through [`JobHandle`]
//! - Deletion with reference checks and data relocation
//! - Download planning and the expiration reaper

pub mod delete;
pub mod download;
pub mod error;
pub mod indexing;
mod ingest;
pub mod jobs;
pub mod locker;
pub mod parts;
pub mod reaper;
pub mod service;
pub mod subset;
pub mod update;

pub use download::DownloadPlan;
pub use error::{NodeError, NodeResult};
pub use indexing::{IndexRequest, IndexUpload};
pub use jobs::{JobHandle, JobStatus};
pub use locker::{IndexKey, LockManager, SweepStats};
pub use reaper::{ReapStats, spawn_reaper};
pub use service::NodeService;
pub use update::{UpdateRequest, UploadedFile};
