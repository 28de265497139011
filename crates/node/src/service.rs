//! The node service: create, load, save and list nodes.

use crate::error::{NodeError, NodeResult};
use crate::locker::LockManager;
use crate::update::UpdateRequest;
use shoal_core::Node;
use shoal_core::NodeId;
use shoal_core::config::{AppConfig, LockConfig, NodeConfig};
use shoal_metadata::{MetadataStore, NodeQuery};
use shoal_storage::{BlobStore, ImportMode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

/// Entry point for node mutations, index jobs and download planning.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct NodeService {
    pub(crate) storage: Arc<dyn BlobStore>,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) locks: Arc<LockManager>,
    pub(crate) config: Arc<NodeConfig>,
    pub(crate) lock_config: Arc<LockConfig>,
    pub(crate) http: reqwest::Client,
}

impl NodeService {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        locks: Arc<LockManager>,
        config: NodeConfig,
        lock_config: LockConfig,
    ) -> NodeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.url_fetch_timeout())
            .build()?;
        Ok(Self {
            storage,
            metadata,
            locks,
            config: Arc::new(config),
            lock_config: Arc::new(lock_config),
            http,
        })
    }

    /// Open storage and metadata from configuration with a fresh lock manager.
    pub async fn from_config(config: &AppConfig) -> NodeResult<Self> {
        let storage = shoal_storage::from_config(&config.storage).await?;
        let metadata = shoal_metadata::from_config(&config.metadata).await?;
        let locks = Arc::new(LockManager::from_config(&config.locks));
        Self::new(
            storage,
            metadata,
            locks,
            config.node.clone(),
            config.locks.clone(),
        )
    }

    pub fn storage(&self) -> &Arc<dyn BlobStore> {
        &self.storage
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Create a node owned by `owner` and apply `request` to it.
    ///
    /// The node directory is removed again if the request fails.
    #[instrument(skip(self, request))]
    pub async fn create(&self, owner: Option<&str>, request: UpdateRequest) -> NodeResult<Node> {
        let mut node = Node::new(owner);
        self.storage.create_node_dir(&node.id).await?;
        let guard = self.locks.nodes.lock(node.id).await?;

        let result = async {
            let file_lock = self.apply_update(&mut node, request, &guard).await?;
            self.save(&mut node).await?;
            Ok::<_, NodeError>(file_lock)
        }
        .await;
        match result {
            Ok(file_lock) => self.apply_file_lock(&node.id, file_lock),
            Err(err) => {
                if let Err(cleanup) = self.storage.remove_node_dir(&node.id).await {
                    warn!(node_id = %node.id, error = %cleanup, "failed to remove directory of rejected node");
                }
                return Err(err);
            }
        }

        info!(node_id = %node.id, node_type = node.type_name(), "node created");
        Ok(node)
    }

    /// Load a node document.
    pub async fn get(&self, id: &NodeId) -> NodeResult<Node> {
        self.metadata
            .get_node(id)
            .await?
            .ok_or_else(|| NodeError::NotFound(format!("node {id}")))
    }

    /// Load a node with in-flight index locks filled into its catalog.
    pub async fn get_for_display(&self, id: &NodeId) -> NodeResult<Node> {
        let mut node = self.get(id).await?;
        self.fill_lock_info(&mut node);
        Ok(node)
    }

    pub(crate) fn fill_lock_info(&self, node: &mut Node) {
        for (name, lock) in self.locks.indexes.for_node(&node.id) {
            if let Some(info) = node.indexes.get_mut(&name) {
                info.locked = Some(lock);
            }
        }
    }

    /// List nodes matching `query`, newest first, with the total match count.
    pub async fn list(
        &self,
        query: &NodeQuery,
        limit: u64,
        offset: u64,
    ) -> NodeResult<(Vec<Node>, u64)> {
        let (mut nodes, total) = self.metadata.find_nodes(query, limit, offset).await?;
        for node in &mut nodes {
            self.fill_lock_info(node);
        }
        Ok((nodes, total))
    }

    /// Persist a node: refresh its version, record a revision, upsert the
    /// document and rewrite the local snapshot.
    ///
    /// The document store is authoritative; a failed snapshot write is logged.
    #[instrument(skip(self, node), fields(node_id = %node.id))]
    pub async fn save(&self, node: &mut Node) -> NodeResult<()> {
        node.clear_lock_info();
        node.update_version()?;
        node.record_revision(self.config.max_revisions);
        node.last_modified = Some(OffsetDateTime::now_utc());

        self.metadata.upsert_node(node).await?;
        if let Err(err) = self.storage.write_snapshot(node).await {
            warn!(node_id = %node.id, error = %err, "failed to write node snapshot");
        }
        Ok(())
    }

    /// Where a node's bytes live: its own data file unless it shares another's.
    pub(crate) fn data_location(&self, node: &Node) -> PathBuf {
        node.file
            .path
            .clone()
            .unwrap_or_else(|| self.storage.layout().data_path(&node.id))
    }

    /// Move a staged file into place, discarding it if that fails.
    pub(crate) async fn install(&self, staged: &Path, dest: &Path) -> NodeResult<()> {
        if let Err(err) = self
            .storage
            .import_file(staged, dest, ImportMode::Move)
            .await
        {
            let _ = self.storage.remove_file(staged).await;
            return Err(err.into());
        }
        Ok(())
    }
}

/// Run blocking index or reader work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> NodeResult<T>
where
    F: FnOnce() -> NodeResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| NodeError::Internal(format!("blocking task failed: {e}")))?
}
