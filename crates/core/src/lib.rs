//! Core domain types and algorithms for the shoal node store.
//!
//! This crate is synchronous and I/O-light; it defines:
//! - Node identity, the `Node` aggregate and its ACL policy
//! - The binary index format and the part/range query engine
//! - Sequence format readers and the indexer engines
//! - Configuration shared by every other crate

pub mod acl;
pub mod config;
pub mod error;
pub mod format;
pub mod hash;
pub mod id;
pub mod index;
pub mod indexer;
pub mod node;

pub use acl::{Acl, Right, Rights};
pub use error::{Error, Result};
pub use hash::{CHECKSUM_ALGORITHM, Checksum, ChecksumHasher};
pub use id::NodeId;
pub use index::{DynamicIdx, Idx, IndexRecord, IndexSource, PartSpec, SizeIndex};
pub use indexer::{BuildOutcome, IndexKind};
pub use node::{FileInfo, IdxInfo, LockInfo, Node, NodeBody};

/// Default chunk size for size indexes and chunk-record indexing: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
