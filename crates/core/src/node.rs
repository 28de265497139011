//! The node aggregate: one stored file plus metadata and an index catalog.

use crate::acl::Acl;
use crate::error::{Error, Result};
use crate::hash::{CHECKSUM_ALGORITHM, digest_hex};
use crate::id::NodeId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use time::{Duration, OffsetDateTime};

/// Name of the virtual size index present on every node with a file.
pub const SIZE_INDEX: &str = "size";

/// Linkage relation that may only be set once.
pub const PARENT_RELATION: &str = "parent";

static EXPIRATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)(M|H|D)$").expect("valid expiration pattern"));

/// File descriptor of a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    /// Algorithm name to lowercase hex digest.
    #[serde(default)]
    pub checksum: BTreeMap<String, String>,
    #[serde(default)]
    pub format: String,
    /// Data location when the bytes live outside this node's directory
    /// (kept local files and copies). Never exposed to clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default)]
    pub virtual_parts: Vec<NodeId>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_on: Option<OffsetDateTime>,
}

impl FileInfo {
    /// SHA-256 digest, if recorded.
    pub fn sha256(&self) -> Option<&str> {
        self.checksum.get(CHECKSUM_ALGORITHM).map(String::as_str)
    }
}

/// Advisory lock state attached to files and indexes while work is in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LockInfo {
    pub fn new() -> Self {
        Self {
            created_on: OffsetDateTime::now_utc(),
            error: None,
        }
    }
}

impl Default for LockInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog entry for one named index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdxInfo {
    pub index_type: String,
    pub total_units: u64,
    pub avg_unit_size: u64,
    pub format: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    /// Present while the index is being rebuilt or its last build failed.
    /// Filled in when a node is loaded for display, never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<LockInfo>,
}

impl IdxInfo {
    pub fn new(
        index_type: impl Into<String>,
        total_units: u64,
        avg_unit_size: u64,
        format: impl Into<String>,
    ) -> Self {
        Self {
            index_type: index_type.into(),
            total_units,
            avg_unit_size,
            format: format.into(),
            created_on: OffsetDateTime::now_utc(),
            locked: None,
        }
    }

    /// The virtual size index for a file of `size` bytes split into `chunk_size` units.
    pub fn size_index(size: u64, chunk_size: u64) -> Self {
        Self::new(
            SIZE_INDEX,
            size.div_ceil(chunk_size.max(1)),
            chunk_size,
            "dynamic",
        )
    }
}

/// Relation from this node to others.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Linkage {
    pub relation: String,
    pub ids: Vec<String>,
    #[serde(default)]
    pub operation: String,
}

/// One uploaded part of a parts node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartFile {
    /// 1-based part number.
    pub index: u32,
    pub name: String,
    pub checksum: String,
}

/// Compression applied to uploaded bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Bzip2,
}

impl Compression {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gzip" => Some(Self::Gzip),
            "bzip2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        }
    }

    /// Strip this compression's conventional suffix from a file name.
    pub fn strip_suffix<'a>(&self, name: &'a str) -> &'a str {
        let suffixes: &[&str] = match self {
            Self::Gzip => &[".gz", ".gzip"],
            Self::Bzip2 => &[".bz2", ".bzip2"],
        };
        suffixes
            .iter()
            .find_map(|suffix| name.strip_suffix(suffix))
            .unwrap_or(name)
    }
}

/// In-progress partial upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartsState {
    /// Declared part count, `None` for variable-length uploads.
    pub count: Option<u32>,
    /// Number of parts received so far.
    pub length: u32,
    pub varlen: bool,
    #[serde(default)]
    pub parts: Vec<PartFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compression>,
}

impl PartsState {
    pub fn fixed(count: u32, compression: Option<Compression>) -> Self {
        Self {
            count: Some(count),
            varlen: false,
            compression,
            ..Self::default()
        }
    }

    pub fn variable(compression: Option<Compression>) -> Self {
        Self {
            count: None,
            varlen: true,
            compression,
            ..Self::default()
        }
    }

    pub fn has_part(&self, index: u32) -> bool {
        self.parts.iter().any(|p| p.index == index)
    }

    /// Whether every declared part has arrived. Always false for varlen.
    pub fn is_complete(&self) -> bool {
        self.count.is_some_and(|count| self.length >= count)
    }
}

/// Source of a copy node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyState {
    pub source: NodeId,
}

/// Parent reference of a subset node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetParent {
    pub id: NodeId,
    pub index_name: String,
}

/// Compressed companion index describing which parent byte ranges make up a subset node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetIndexInfo {
    pub path: PathBuf,
    pub total_units: u64,
    pub avg_unit_size: u64,
    pub format: String,
}

/// Subset provenance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetState {
    pub parent: SubsetParent,
    pub index: SubsetIndexInfo,
}

/// Mode-dependent node state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeBody {
    #[default]
    Plain,
    Parts(PartsState),
    Virtual,
    Copy(CopyState),
    Subset(SubsetState),
}

impl NodeBody {
    /// Discriminator shown to clients; empty for plain nodes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Plain => "",
            Self::Parts(_) => "parts",
            Self::Virtual => "virtual",
            Self::Copy(_) => "copy",
            Self::Subset(_) => "subset",
        }
    }
}

/// The node aggregate root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub version_parts: BTreeMap<String, String>,
    #[serde(default)]
    pub file: FileInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
    #[serde(default)]
    pub indexes: BTreeMap<String, IdxInfo>,
    #[serde(default)]
    pub acl: Acl,
    #[serde(default)]
    pub linkages: Vec<Linkage>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Prior snapshots, newest first.
    #[serde(default)]
    pub revisions: Vec<Node>,
    #[serde(default)]
    pub priority: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
    #[serde(default)]
    pub body: NodeBody,
}

impl Node {
    /// Create an empty node with a fresh id.
    pub fn new(owner: Option<&str>) -> Self {
        Self::with_id(NodeId::new(), owner)
    }

    pub fn with_id(id: NodeId, owner: Option<&str>) -> Self {
        Self {
            id,
            version: String::new(),
            version_parts: BTreeMap::new(),
            file: FileInfo::default(),
            attributes: None,
            indexes: BTreeMap::new(),
            acl: Acl::owned_by(owner),
            linkages: Vec::new(),
            tags: Vec::new(),
            revisions: Vec::new(),
            priority: 0,
            created_on: OffsetDateTime::now_utc(),
            last_modified: None,
            expiration: None,
            body: NodeBody::Plain,
        }
    }

    /// Whether a file-defining mode already ran on this node.
    pub fn has_file(&self) -> bool {
        self.file.created_on.is_some()
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.body, NodeBody::Virtual)
    }

    pub fn type_name(&self) -> &'static str {
        self.body.type_name()
    }

    /// Record the file as set: name, size, checksum, timestamp and the size index.
    pub fn set_file(&mut self, name: impl Into<String>, size: u64, sha256: String, chunk_size: u64) {
        self.file.name = name.into();
        self.file.size = size;
        self.file
            .checksum
            .insert(CHECKSUM_ALGORITHM.to_string(), sha256);
        self.file.created_on = Some(OffsetDateTime::now_utc());
        self.set_size_index(chunk_size);
    }

    /// Refresh the `size` catalog entry from the current file size.
    pub fn set_size_index(&mut self, chunk_size: u64) {
        self.indexes.insert(
            SIZE_INDEX.to_string(),
            IdxInfo::size_index(self.file.size, chunk_size),
        );
    }

    /// Union `tags` (comma separated) into the tag set, keeping insertion order.
    pub fn add_tags(&mut self, tags: &str) {
        for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if !self.tags.iter().any(|existing| existing == tag) {
                self.tags.push(tag.to_string());
            }
        }
    }

    pub fn has_parent_linkage(&self) -> bool {
        self.linkages.iter().any(|l| l.relation == PARENT_RELATION)
    }

    /// Strip display-only lock state from the index catalog.
    pub fn clear_lock_info(&mut self) {
        for info in self.indexes.values_mut() {
            info.locked = None;
        }
    }

    /// Recompute `version_parts` and `version` from file, indexes, attributes and acl.
    pub fn update_version(&mut self) -> Result<()> {
        let mut parts = BTreeMap::new();
        parts.insert(
            "file_ver".to_string(),
            digest_hex(serde_json::to_vec(&self.file)?),
        );
        parts.insert(
            "indexes_ver".to_string(),
            digest_hex(serde_json::to_vec(&self.indexes)?),
        );
        parts.insert(
            "attributes_ver".to_string(),
            digest_hex(serde_json::to_vec(&self.attributes)?),
        );
        parts.insert(
            "acl_ver".to_string(),
            digest_hex(serde_json::to_vec(&self.acl)?),
        );

        let mut material = self.id.to_string();
        for key in ["file_ver", "indexes_ver", "attributes_ver", "acl_ver"] {
            material.push(':');
            material.push_str(&parts[key]);
        }
        self.version = digest_hex(material);
        self.version_parts = parts;
        Ok(())
    }

    /// Prepend a snapshot of the current state when the version changed.
    ///
    /// `max_revisions` < 0 keeps every snapshot, 0 disables history.
    pub fn record_revision(&mut self, max_revisions: i64) {
        if max_revisions == 0 {
            self.revisions.clear();
            return;
        }
        let changed = self
            .revisions
            .first()
            .is_none_or(|head| head.version != self.version);
        if changed {
            let mut snapshot = self.clone();
            snapshot.revisions.clear();
            self.revisions.insert(0, snapshot);
        }
        if let Ok(max) = usize::try_from(max_revisions) {
            self.revisions.truncate(max);
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expiration.is_some_and(|at| at <= now)
    }
}

/// Parse an expiration of the form `<n>M`, `<n>H` or `<n>D` relative to `now`.
pub fn parse_expiration(value: &str, now: OffsetDateTime) -> Result<OffsetDateTime> {
    let caps = EXPIRATION_RE
        .captures(value.trim())
        .ok_or_else(|| Error::InvalidExpiration(value.to_string()))?;
    let amount: i64 = caps[1]
        .parse()
        .map_err(|_| Error::InvalidExpiration(value.to_string()))?;
    let unit: i64 = match &caps[2] {
        "M" => 60,
        "H" => 3_600,
        _ => 86_400,
    };
    amount
        .checked_mul(unit)
        .map(Duration::seconds)
        .and_then(|delta| now.checked_add(delta))
        .ok_or_else(|| Error::InvalidExpiration(value.to_string()))
}
