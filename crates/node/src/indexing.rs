//! Index catalog operations: asynchronous builds, uploads and deletes.

use crate::error::{NodeError, NodeResult};
use crate::jobs::{self, JobHandle};
use crate::locker::IndexKey;
use crate::service::{NodeService, blocking};
use crate::update::UploadedFile;
use shoal_core::indexer::{self, IndexKind};
use shoal_core::node::{NodeBody, SIZE_INDEX};
use shoal_core::{IdxInfo, Node, NodeId};
use shoal_storage::ImportMode;
use std::path::PathBuf;
use tracing::{info, instrument};

/// A request to build an index on a node.
#[derive(Clone, Debug, Default)]
pub struct IndexRequest {
    /// `record`, `chunkrecord`, `line`, `column`, `subset`, `size` or `bai`.
    pub index_type: String,
    /// 1-indexed column for `column` indexes.
    pub column: Option<usize>,
    /// Parent index of a `subset` index.
    pub parent_index: Option<String>,
    /// Name of a `subset` index.
    pub index_name: Option<String>,
    /// Sorted id list of a `subset` index.
    pub ids: Option<UploadedFile>,
    pub force_rebuild: bool,
}

impl IndexRequest {
    pub fn new(index_type: impl Into<String>) -> Self {
        Self {
            index_type: index_type.into(),
            ..Self::default()
        }
    }
}

/// A pre-built index supplied by the client.
#[derive(Clone, Debug)]
pub struct IndexUpload {
    pub name: String,
    pub file: UploadedFile,
    pub format: String,
    pub avg_unit_size: u64,
    pub total_units: u64,
}

/// Catalog `type` for an index known only by name.
fn type_for_name(name: &str) -> &str {
    match name {
        "record" | "chunkrecord" | "line" | "size" | "bai" => name,
        n if n.starts_with("column") => "column",
        _ => "subset",
    }
}

struct PlannedBuild {
    name: String,
    kind: IndexKind,
    staged_ids: Option<PathBuf>,
}

impl NodeService {
    /// Start building an index. The returned handle reports the catalog entry
    /// once the build is attached to the node, or the failure message that was
    /// also recorded on the index lock.
    #[instrument(skip(self, request), fields(node_id = %id, index_type = %request.index_type))]
    pub async fn build_index(
        &self,
        id: &NodeId,
        request: IndexRequest,
    ) -> NodeResult<JobHandle<IdxInfo>> {
        let node = self.get(id).await?;
        if !node.has_file() {
            return Err(NodeError::invalid(format!("node {id} has no file to index")));
        }
        if self.locks.files.is_active(id) {
            return Err(NodeError::FileLocked(*id));
        }

        if request.index_type == SIZE_INDEX {
            let guard = self.locks.nodes.lock(*id).await?;
            let mut node = self.get(id).await?;
            node.set_size_index(self.config.chunk_size);
            self.save(&mut node).await?;
            drop(guard);
            let info = node
                .indexes
                .get(SIZE_INDEX)
                .cloned()
                .ok_or_else(|| NodeError::Internal("size index missing after save".into()))?;
            return Ok(JobHandle::ready(info));
        }
        if node.is_virtual() || matches!(node.body, NodeBody::Subset(_)) {
            return Err(NodeError::invalid(format!(
                "{} indexes cannot be built on {} nodes",
                request.index_type,
                node.type_name()
            )));
        }

        let planned = self.plan_build(&node, request).await?;
        let key = IndexKey::new(*id, &planned.name);
        if self.locks.indexes.try_add(key.clone()).is_err() {
            if let Some(staged) = &planned.staged_ids {
                let _ = self.storage.remove_file(staged).await;
            }
            return Err(NodeError::IndexLocked {
                id: *id,
                index: planned.name,
            });
        }

        let service = self.clone();
        let locks = self.locks.clone();
        let data = self.data_location(&node);
        let node_id = *id;
        Ok(jobs::spawn(
            "index build",
            async move { service.run_build(node_id, planned, data).await },
            move |message| locks.indexes.set_error(&key, message),
        ))
    }

    async fn plan_build(&self, node: &Node, request: IndexRequest) -> NodeResult<PlannedBuild> {
        let layout = self.storage.layout();
        let mut staged_ids = None;
        let kind = match request.index_type.as_str() {
            "record" => IndexKind::Record,
            "chunkrecord" => IndexKind::ChunkRecord {
                chunk_size: self.config.chunk_size,
            },
            "line" => IndexKind::Line,
            "column" => match request.column {
                Some(column) if column >= 1 => IndexKind::Column { column },
                _ => return Err(NodeError::invalid("column index requires a column >= 1")),
            },
            "bai" => {
                if !node.file.name.ends_with(".bam") {
                    return Err(NodeError::invalid("bai indexes require a .bam file"));
                }
                IndexKind::Bai {
                    samtools: self.config.samtools.clone(),
                }
            }
            "subset" => {
                let name = request
                    .index_name
                    .as_deref()
                    .ok_or_else(|| NodeError::invalid("subset index requires index_name"))?;
                if indexer::is_reserved(name) {
                    return Err(NodeError::invalid(format!(
                        "{name} is a reserved index name"
                    )));
                }
                layout.index_path(&node.id, name)?;
                let parent = request
                    .parent_index
                    .as_deref()
                    .ok_or_else(|| NodeError::invalid("subset index requires parent_index"))?;
                let parent_path = layout.index_path(&node.id, parent)?;
                if !node.indexes.contains_key(parent) || !self.storage.exists(&parent_path).await? {
                    return Err(shoal_core::Error::IndexNotFound(parent.to_string()).into());
                }
                let ids = request
                    .ids
                    .as_ref()
                    .ok_or_else(|| NodeError::invalid("subset index requires an ids file"))?;
                let staged = self.storage.temp_path();
                self.storage
                    .import_file(&ids.path, &staged, ImportMode::Move)
                    .await?;
                staged_ids = Some(staged.clone());
                IndexKind::Subset {
                    parent_index: parent_path,
                    ids: staged,
                    compressed: None,
                }
            }
            other => return Err(shoal_core::Error::InvalidIndexType(other.to_string()).into()),
        };

        let name = match kind.name() {
            Some(name) => name,
            None => request.index_name.unwrap_or_default(),
        };
        if node.indexes.contains_key(&name) && !request.force_rebuild {
            if let Some(staged) = &staged_ids {
                let _ = self.storage.remove_file(staged).await;
            }
            return Err(NodeError::invalid(format!(
                "index {name} already exists; set force_rebuild to replace it"
            )));
        }
        Ok(PlannedBuild {
            name,
            kind,
            staged_ids,
        })
    }

    async fn run_build(&self, id: NodeId, planned: PlannedBuild, data: PathBuf) -> NodeResult<IdxInfo> {
        let PlannedBuild {
            name,
            kind,
            staged_ids,
        } = planned;
        let out = self.storage.layout().index_path(&id, &name)?;
        let type_name = kind.type_name();
        let is_bai = matches!(kind, IndexKind::Bai { .. });

        // built beside the catalog and renamed in, so a failed rebuild keeps
        // the previous index
        let staged_out = self.storage.temp_path();
        let (data_path, out_path) = (data.clone(), staged_out.clone());
        let built = blocking(move || Ok(indexer::build(&kind, &data_path, &out_path)?)).await;
        if let Some(staged) = &staged_ids {
            let _ = self.storage.remove_file(staged).await;
        }
        let outcome = match built {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = self.storage.remove_file(&staged_out).await;
                return Err(err);
            }
        };

        let data_len = tokio::fs::metadata(&data).await?.len();
        if outcome.count == 0 && data_len > 0 && !is_bai {
            let _ = self.storage.remove_file(&staged_out).await;
            return Err(shoal_core::Error::EmptyIndex.into());
        }
        self.install(&staged_out, &out).await?;

        let info = IdxInfo::new(
            type_name,
            outcome.count,
            outcome.avg_unit_size(),
            outcome.format,
        );
        let guard = self.locks.nodes.lock(id).await?;
        let mut node = self.get(&id).await?;
        node.indexes.insert(name.clone(), info.clone());
        self.save(&mut node).await?;
        drop(guard);

        self.locks.indexes.remove(&IndexKey::new(id, &name));
        info!(node_id = %id, index = %name, units = info.total_units, "index built");
        Ok(info)
    }

    /// Attach a client-built index file to the catalog.
    #[instrument(skip(self, upload), fields(node_id = %id, index = %upload.name))]
    pub async fn upload_index(&self, id: &NodeId, upload: IndexUpload) -> NodeResult<IdxInfo> {
        if upload.name == SIZE_INDEX {
            return Err(NodeError::invalid("the size index cannot be uploaded"));
        }
        let dest = self.storage.layout().index_path(id, &upload.name)?;
        let key = IndexKey::new(*id, &upload.name);
        if self.locks.indexes.try_add(key.clone()).is_err() {
            return Err(NodeError::IndexLocked {
                id: *id,
                index: upload.name,
            });
        }

        let result = async {
            let guard = self.locks.nodes.lock(*id).await?;
            let mut node = self.get(id).await?;
            if !node.has_file() {
                return Err(NodeError::invalid(format!("node {id} has no file to index")));
            }
            self.install(&upload.file.path, &dest).await?;
            let info = IdxInfo::new(
                type_for_name(&upload.name),
                upload.total_units,
                upload.avg_unit_size,
                upload.format.clone(),
            );
            node.indexes.insert(upload.name.clone(), info.clone());
            self.save(&mut node).await?;
            drop(guard);
            Ok::<_, NodeError>(info)
        }
        .await;
        self.locks.indexes.remove(&key);
        result
    }

    /// Remove an index file and its catalog entry.
    #[instrument(skip(self), fields(node_id = %id))]
    pub async fn delete_index(&self, id: &NodeId, name: &str) -> NodeResult<Node> {
        if name == SIZE_INDEX {
            return Err(NodeError::invalid("the size index cannot be deleted"));
        }
        let guard = self.locks.nodes.lock(*id).await?;
        let mut node = self.get(id).await?;
        if !node.indexes.contains_key(name) {
            return Err(shoal_core::Error::IndexNotFound(name.to_string()).into());
        }
        if self.locks.indexes.is_active(&IndexKey::new(*id, name)) {
            return Err(NodeError::IndexLocked {
                id: *id,
                index: name.to_string(),
            });
        }
        match self
            .storage
            .remove_file(&self.storage.layout().index_path(id, name)?)
            .await
        {
            Ok(()) | Err(shoal_storage::StorageError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        node.indexes.remove(name);
        self.save(&mut node).await?;
        drop(guard);
        info!(node_id = %id, index = %name, "index deleted");
        Ok(node)
    }
}
