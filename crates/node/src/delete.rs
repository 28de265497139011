//! Node deletion.

use crate::error::{NodeError, NodeResult};
use crate::service::NodeService;
use shoal_core::NodeId;
use shoal_metadata::NodeQuery;
use shoal_storage::ImportMode;
use tracing::{info, instrument};

/// Upper bound on referencing nodes named in a refusal.
const REFERENCE_REPORT_LIMIT: u64 = 50;

impl NodeService {
    /// Delete a node: its document, directory and any lock state.
    ///
    /// Refused while a virtual node lists it as a part. When copies share this
    /// node's data file, the file moves to the first copy and the others are
    /// repointed at it.
    #[instrument(skip(self), fields(node_id = %id))]
    pub async fn delete(&self, id: &NodeId) -> NodeResult<()> {
        let guard = self.locks.nodes.lock(*id).await?;
        let node = self.get(id).await?;

        let (referencing, total) = self
            .metadata
            .find_nodes(&NodeQuery::referencing(*id), REFERENCE_REPORT_LIMIT, 0)
            .await?;
        if total > 0 {
            return Err(NodeError::NodeReferenced {
                id: *id,
                referenced_by: referencing.iter().map(|n| n.id.to_string()).collect(),
            });
        }

        if node.has_file() && node.file.path.is_none() && !node.is_virtual() {
            self.relocate_data(id).await?;
        }

        self.metadata.delete_node(id).await?;
        self.storage.remove_node_dir(id).await?;
        self.locks.files.remove(id);
        for (index, _) in self.locks.indexes.for_node(id) {
            self.locks
                .indexes
                .remove(&crate::locker::IndexKey::new(*id, index));
        }
        drop(guard);
        info!(node_id = %id, "node deleted");
        Ok(())
    }

    /// Hand this node's data file to the nodes that share it.
    async fn relocate_data(&self, id: &NodeId) -> NodeResult<()> {
        let layout = self.storage.layout();
        let data = layout.data_path(id);
        let query = NodeQuery::file_path(data.to_string_lossy());
        let (sharing, _) = self.metadata.find_nodes(&query, u64::MAX, 0).await?;
        let mut sharing = sharing.into_iter().filter(|n| n.id != *id);
        let Some(first) = sharing.next() else {
            return Ok(());
        };

        let heir = first.id;
        let heir_data = layout.data_path(&heir);
        {
            let _heir_guard = self.locks.nodes.lock(heir).await?;
            let mut heir_node = self.get(&heir).await?;
            self.storage
                .import_file(&data, &heir_data, ImportMode::Move)
                .await?;
            heir_node.file.path = None;
            self.save(&mut heir_node).await?;
        }

        for other in sharing {
            let _other_guard = self.locks.nodes.lock(other.id).await?;
            let mut other = self.get(&other.id).await?;
            other.file.path = Some(heir_data.clone());
            self.save(&mut other).await?;
        }
        info!(node_id = %id, heir = %heir, "data file relocated");
        Ok(())
    }
}
