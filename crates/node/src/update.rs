//! The node update protocol.
//!
//! A request carries string parameters and uploaded files. It selects at
//! most one upload mode, which defines the node's file, and any number of
//! metadata side channels. Modes are mutually exclusive and a node's file
//! can only be defined once.

use crate::error::{NodeError, NodeResult};
use crate::ingest;
use crate::locker::NodeGuard;
use crate::service::NodeService;
use shoal_core::node::{
    Compression, CopyState, Linkage, NodeBody, PARENT_RELATION, SubsetIndexInfo, SubsetState,
    parse_expiration,
};
use shoal_core::{Node, NodeId};
use shoal_storage::{ImportMode, StorageError, resolve_local_path};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::debug;

/// File lock change requested alongside an update. Applied only once the
/// node has been saved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum FileLockChange {
    #[default]
    Keep,
    Add,
    Remove,
}

/// Side-channel values parsed before the upload mode runs.
#[derive(Debug, Default)]
struct SideChannels {
    attributes: Option<serde_json::Value>,
    expiration: Option<OffsetDateTime>,
    file_lock: FileLockChange,
}

/// Form fields that carry the node's file, with the compression they imply.
pub const UPLOAD_FIELDS: [(&str, Option<Compression>); 3] = [
    ("upload", None),
    ("gzip", Some(Compression::Gzip)),
    ("bzip2", Some(Compression::Bzip2)),
];

/// A file already written to local disk by the transport layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    /// Client-supplied file name.
    pub name: String,
    /// Where the bytes are staged. Consumed (moved) by the update.
    pub path: PathBuf,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Parameters and files of one node mutation.
#[derive(Clone, Debug, Default)]
pub struct UpdateRequest {
    pub params: BTreeMap<String, String>,
    pub files: BTreeMap<String, UploadedFile>,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn file(mut self, field: impl Into<String>, file: UploadedFile) -> Self {
        self.files.insert(field.into(), file);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty() && self.files.is_empty()
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| !matches!(v, "false" | "0" | "no"))
    }

    fn require(&self, key: &str, mode: &str) -> NodeResult<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| NodeError::invalid(format!("{mode} requires the {key} parameter")))
    }

    /// Numbered part files (`"1"`, `"2"`, ...).
    pub(crate) fn part_files(&self) -> impl Iterator<Item = (u32, &UploadedFile)> {
        self.files
            .iter()
            .filter_map(|(key, file)| key.parse::<u32>().ok().map(|n| (n, file)))
    }
}

/// The upload mode a request selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum UploadMode {
    File(Option<Compression>),
    Url,
    Parts,
    Virtual,
    Path,
    Copy,
    Subset,
}

impl UploadMode {
    fn marker(&self) -> &'static str {
        match self {
            Self::File(_) => "upload",
            Self::Url => "upload_url",
            Self::Parts => "parts",
            Self::Virtual => "virtual",
            Self::Path => "path",
            Self::Copy => "copy_data",
            Self::Subset => "parent_node",
        }
    }
}

/// Pick the single upload mode of `request`, if any.
pub(crate) fn classify(request: &UpdateRequest) -> NodeResult<Option<UploadMode>> {
    for (field, _) in UPLOAD_FIELDS {
        if request.params.contains_key(field) {
            return Err(NodeError::invalid(format!(
                "{field} form field must be file encoded"
            )));
        }
    }
    if request.params.contains_key("attributes") {
        return Err(NodeError::invalid(
            "attributes form field must be file encoded",
        ));
    }

    let uploads: Vec<_> = UPLOAD_FIELDS
        .iter()
        .filter(|(field, _)| request.files.contains_key(*field))
        .collect();
    if uploads.len() > 1 {
        return Err(NodeError::invalid(
            "only one of upload, gzip or bzip2 may be sent",
        ));
    }

    let mut modes = Vec::new();
    if let Some((_, compression)) = uploads.first() {
        modes.push(UploadMode::File(*compression));
    }
    if request.params.contains_key("upload_url") {
        modes.push(UploadMode::Url);
    }
    if request.params.contains_key("parts") || request.part_files().next().is_some() {
        modes.push(UploadMode::Parts);
    }
    if request.get("type") == Some("virtual") {
        modes.push(UploadMode::Virtual);
    }
    if request.params.contains_key("path") {
        modes.push(UploadMode::Path);
    }
    if request.params.contains_key("copy_data") {
        modes.push(UploadMode::Copy);
    }
    if request.params.contains_key("parent_node") {
        modes.push(UploadMode::Subset);
    }

    match modes.as_slice() {
        [] => Ok(None),
        [mode] => Ok(Some(*mode)),
        [first, rest @ ..] => {
            let others: Vec<_> = rest.iter().map(UploadMode::marker).collect();
            Err(NodeError::invalid(format!(
                "{} incompatible with {}",
                first.marker(),
                others.join(", ")
            )))
        }
    }
}

impl NodeService {
    /// Apply `request` to an existing node under its lock and save it.
    #[tracing::instrument(skip(self, request), fields(node_id = %id))]
    pub async fn update(&self, id: &NodeId, request: UpdateRequest) -> NodeResult<Node> {
        let guard = self.locks.nodes.lock(*id).await?;
        let mut node = self.get(id).await?;
        let file_lock = self.apply_update(&mut node, request, &guard).await?;
        self.save(&mut node).await?;
        self.apply_file_lock(&node.id, file_lock);
        drop(guard);
        Ok(node)
    }

    /// Run the upload mode and side channels of `request` against `node`.
    /// The caller holds `guard`, saves the node afterwards and then applies
    /// the returned file lock change.
    pub(crate) async fn apply_update(
        &self,
        node: &mut Node,
        request: UpdateRequest,
        guard: &NodeGuard,
    ) -> NodeResult<FileLockChange> {
        debug_assert_eq!(guard.id(), node.id);
        let mode = classify(&request)?;
        let side = self.check_side_channels(node, &request, mode).await?;

        if let Some(mode) = mode {
            if self.locks.files.is_active(&node.id) {
                return Err(NodeError::FileLocked(node.id));
            }
            let parts_node = matches!(node.body, NodeBody::Parts(_));
            if parts_node && mode != UploadMode::Parts {
                return Err(NodeError::invalid(format!(
                    "{} incompatible with an unfinished parts upload",
                    mode.marker()
                )));
            }
            if node.has_file() {
                return Err(NodeError::FileImmutable(node.id));
            }
            debug!(node_id = %node.id, mode = mode.marker(), "applying upload mode");
            match mode {
                UploadMode::File(compression) => {
                    self.set_uploaded_file(node, &request, compression).await?
                }
                UploadMode::Url => self.set_url_file(node, &request).await?,
                UploadMode::Parts => self.apply_parts(node, &request).await?,
                UploadMode::Virtual => self.set_virtual(node, &request).await?,
                UploadMode::Path => self.set_local_file(node, &request).await?,
                UploadMode::Copy => self.set_copy(node, &request).await?,
                UploadMode::Subset => self.set_subset(node, &request).await?,
            }
        }

        let file_lock = side.file_lock;
        self.apply_side_channels(node, &request, side)?;
        Ok(file_lock)
    }

    pub(crate) fn apply_file_lock(&self, id: &NodeId, change: FileLockChange) {
        match change {
            FileLockChange::Keep => {}
            // Already held means another request locked it first; the lock stands either way.
            FileLockChange::Add => {
                let _ = self.locks.files.try_add(*id);
            }
            FileLockChange::Remove => {
                self.locks.files.remove(id);
            }
        }
    }

    /// Validate and parse side channels against the stored node before
    /// anything changes, so a rejected request leaves no trace on disk.
    async fn check_side_channels(
        &self,
        node: &Node,
        request: &UpdateRequest,
        mode: Option<UploadMode>,
    ) -> NodeResult<SideChannels> {
        let mut side = SideChannels::default();
        let attributes_file = request.files.contains_key("attributes");
        let attributes_str = request.params.contains_key("attributes_str");
        if attributes_file && attributes_str {
            return Err(NodeError::invalid(
                "attributes incompatible with attributes_str",
            ));
        }
        let copies_attributes = mode == Some(UploadMode::Copy) && request.flag("copy_attributes");
        if (attributes_file || attributes_str || copies_attributes) && node.attributes.is_some() {
            return Err(NodeError::AttributesImmutable(node.id));
        }
        if let Some(file) = request.files.get("attributes") {
            let raw = tokio::fs::read(&file.path).await?;
            side.attributes = Some(parse_attributes(&raw)?);
        } else if let Some(raw) = request.get("attributes_str") {
            side.attributes = Some(parse_attributes(raw.as_bytes())?);
        }

        if request.params.contains_key("file_name") && !node.has_file() && mode.is_none() {
            return Err(NodeError::invalid("file_name requires a file"));
        }

        if let Some(relation) = request.get("linkage") {
            request.require("ids", "linkage")?;
            if relation == PARENT_RELATION && node.has_parent_linkage() {
                return Err(NodeError::ParentLinkageImmutable(node.id));
            }
        }

        if request.params.contains_key("format") && !node.file.format.is_empty() {
            return Err(NodeError::FormatImmutable {
                id: node.id,
                format: node.file.format.clone(),
            });
        }
        if request.params.contains_key("format") && mode == Some(UploadMode::Subset) {
            return Err(NodeError::invalid(
                "format incompatible with a subset node, which takes its parent's format",
            ));
        }

        if let Some(priority) = request.get("priority") {
            priority
                .parse::<i64>()
                .map_err(|_| NodeError::invalid(format!("priority must be an integer: {priority}")))?;
        }

        if request.params.contains_key("expiration")
            && request.params.contains_key("remove_expiration")
        {
            return Err(NodeError::invalid(
                "expiration incompatible with remove_expiration",
            ));
        }
        if let Some(expiration) = request.get("expiration") {
            side.expiration = Some(parse_expiration(expiration, OffsetDateTime::now_utc())?);
        }

        if let Some(value) = request.get("file_lock") {
            side.file_lock = match value {
                "true" if self.locks.files.is_active(&node.id) => {
                    return Err(NodeError::FileLocked(node.id));
                }
                "true" => FileLockChange::Add,
                "false" => FileLockChange::Remove,
                other => {
                    return Err(NodeError::invalid(format!(
                        "file_lock must be true or false, got {other}"
                    )));
                }
            };
        }
        Ok(side)
    }

    fn apply_side_channels(
        &self,
        node: &mut Node,
        request: &UpdateRequest,
        side: SideChannels,
    ) -> NodeResult<()> {
        if let Some(attributes) = side.attributes {
            node.attributes = Some(attributes);
        }

        if let Some(name) = request.get("file_name") {
            node.file.name = name.to_string();
        }

        if let Some(relation) = request.get("linkage") {
            let ids = request
                .require("ids", "linkage")?
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            node.linkages.push(Linkage {
                relation: relation.to_string(),
                ids,
                operation: request.get("operation").unwrap_or_default().to_string(),
            });
        }

        if let Some(tags) = request.get("tags") {
            node.add_tags(tags);
        }

        if let Some(format) = request.get("format") {
            if !node.file.format.is_empty() && node.file.format != format {
                return Err(NodeError::FormatImmutable {
                    id: node.id,
                    format: node.file.format.clone(),
                });
            }
            node.file.format = format.to_string();
        }

        if let Some(priority) = request.get("priority") {
            node.priority = priority
                .parse()
                .map_err(|_| NodeError::invalid(format!("priority must be an integer: {priority}")))?;
        }

        if let Some(expiration) = side.expiration {
            node.expiration = Some(expiration);
        } else if request.params.contains_key("remove_expiration") {
            node.expiration = None;
        }

        if request.params.contains_key("clear_revisions") {
            node.revisions.clear();
        }
        Ok(())
    }

    async fn set_uploaded_file(
        &self,
        node: &mut Node,
        request: &UpdateRequest,
        compression: Option<Compression>,
    ) -> NodeResult<()> {
        let field = UPLOAD_FIELDS
            .iter()
            .find(|(_, c)| *c == compression)
            .map_or("upload", |(field, _)| *field);
        let file = request
            .files
            .get(field)
            .ok_or_else(|| NodeError::invalid(format!("missing {field} file")))?;
        let dest = self.storage.layout().data_path(&node.id);

        let digest = match compression {
            None => {
                self.install(&file.path, &dest).await?;
                self.storage.digest_file(&dest).await?
            }
            Some(compression) => {
                let staged = self.storage.temp_path();
                let digest = ingest::decode_file(&file.path, Some(compression), &staged).await?;
                self.install(&staged, &dest).await?;
                let _ = self.storage.remove_file(&file.path).await;
                digest
            }
        };

        let name = compression.map_or(file.name.as_str(), |c| c.strip_suffix(&file.name));
        node.set_file(name, digest.size, digest.checksum.to_hex(), self.config.chunk_size);
        Ok(())
    }

    async fn set_url_file(&self, node: &mut Node, request: &UpdateRequest) -> NodeResult<()> {
        let url = request.require("upload_url", "upload_url")?;
        let staged = self.storage.temp_path();
        let fetched = ingest::fetch_url(&self.http, url, &staged).await;
        let (name, digest) = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                let _ = self.storage.remove_file(&staged).await;
                return Err(err);
            }
        };
        self.install(&staged, &self.storage.layout().data_path(&node.id))
            .await?;
        node.set_file(name, digest.size, digest.checksum.to_hex(), self.config.chunk_size);
        Ok(())
    }

    /// Ingest a file already on the server under an allowed prefix.
    async fn set_local_file(&self, node: &mut Node, request: &UpdateRequest) -> NodeResult<()> {
        if self.config.local_paths.is_empty() {
            return Err(NodeError::invalid("path ingestion is disabled"));
        }
        let requested = Path::new(request.require("path", "path")?);
        let action = request.require("action", "path")?;
        let source = resolve_local_path(requested, &self.config.local_paths).map_err(|e| match e {
            StorageError::InvalidPath(msg) => NodeError::InvalidRequest(msg),
            other => other.into(),
        })?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let digest = match action {
            "copy_file" | "move_file" => {
                let mode = if action == "copy_file" {
                    ImportMode::Copy
                } else {
                    ImportMode::Move
                };
                let dest = self.storage.layout().data_path(&node.id);
                self.storage.import_file(&source, &dest, mode).await?;
                self.storage.digest_file(&dest).await?
            }
            "keep_file" => {
                let digest = self.storage.digest_file(&source).await?;
                node.file.path = Some(source);
                digest
            }
            other => {
                return Err(NodeError::invalid(format!(
                    "action must be copy_file, move_file or keep_file, got {other}"
                )));
            }
        };
        node.set_file(name, digest.size, digest.checksum.to_hex(), self.config.chunk_size);
        Ok(())
    }

    /// Compose the node from the files of other nodes.
    async fn set_virtual(&self, node: &mut Node, request: &UpdateRequest) -> NodeResult<()> {
        let ids = NodeId::parse_list(request.require("source", "type=virtual")?)?;
        if ids.is_empty() {
            return Err(NodeError::invalid("type=virtual requires at least one source"));
        }

        let mut segments = Vec::new();
        for id in &ids {
            let source = self
                .metadata
                .get_node(id)
                .await?
                .ok_or_else(|| NodeError::invalid(format!("virtual source {id} does not exist")))?;
            if source.is_virtual() {
                return Err(NodeError::invalid(format!(
                    "virtual source {id} is itself virtual"
                )));
            }
            if !source.has_file() {
                return Err(NodeError::invalid(format!(
                    "virtual source {id} has no file"
                )));
            }
            segments.extend(self.concrete_segments(&source).await?);
        }

        let digest = self.storage.digest_segments(segments).await?;
        node.body = NodeBody::Virtual;
        node.file.is_virtual = true;
        node.file.virtual_parts = ids;
        node.set_file("", digest.size, digest.checksum.to_hex(), self.config.chunk_size);
        Ok(())
    }

    /// Share another node's bytes without copying them.
    async fn set_copy(&self, node: &mut Node, request: &UpdateRequest) -> NodeResult<()> {
        let source_id = NodeId::parse(request.require("copy_data", "copy_data")?)?;
        let source = self
            .metadata
            .get_node(&source_id)
            .await?
            .ok_or_else(|| NodeError::invalid(format!("copy source {source_id} does not exist")))?;
        if source.is_virtual() {
            return Err(NodeError::invalid("cannot copy a virtual node"));
        }
        if !source.has_file() {
            return Err(NodeError::invalid(format!(
                "copy source {source_id} has no file"
            )));
        }

        let layout = self.storage.layout();
        node.file = source.file.clone();
        node.file.path = Some(self.data_location(&source));
        node.file.created_on = Some(OffsetDateTime::now_utc());

        node.body = match &source.body {
            NodeBody::Subset(subset) => {
                let companion = layout.subset_index_path(&node.id);
                self.storage
                    .import_file(&subset.index.path, &companion, ImportMode::Copy)
                    .await?;
                NodeBody::Subset(SubsetState {
                    parent: subset.parent.clone(),
                    index: SubsetIndexInfo {
                        path: companion,
                        ..subset.index.clone()
                    },
                })
            }
            _ => NodeBody::Copy(CopyState { source: source_id }),
        };

        if request.flag("copy_indexes") {
            for (name, info) in &source.indexes {
                let from = layout.index_path(&source.id, name)?;
                if self.storage.exists(&from).await? {
                    let to = layout.index_path(&node.id, name)?;
                    self.storage.import_file(&from, &to, ImportMode::Copy).await?;
                }
                node.indexes.insert(name.clone(), info.clone());
            }
        } else if let NodeBody::Subset(subset) = &node.body {
            // the parent index entry is what makes a subset node addressable
            let name = subset.parent.index_name.clone();
            if let Some(info) = source.indexes.get(&name) {
                let from = layout.index_path(&source.id, &name)?;
                let to = layout.index_path(&node.id, &name)?;
                self.storage.import_file(&from, &to, ImportMode::Copy).await?;
                node.indexes.insert(name, info.clone());
            }
        }
        node.set_size_index(self.config.chunk_size);

        if request.flag("copy_attributes") {
            node.attributes = source.attributes.clone();
        }
        Ok(())
    }
}

fn parse_attributes(raw: &[u8]) -> NodeResult<serde_json::Value> {
    serde_json::from_slice(raw)
        .map_err(|e| NodeError::invalid(format!("attributes are not valid JSON: {e}")))
}
