//! Subset derivation: a node whose bytes are selected records of a parent.

use crate::error::{NodeError, NodeResult};
use crate::service::{NodeService, blocking};
use crate::update::UpdateRequest;
use shoal_core::indexer::{FORMAT_ARRAY, subset};
use shoal_core::node::{NodeBody, SubsetIndexInfo, SubsetParent, SubsetState};
use shoal_core::{DynamicIdx, IdxInfo, Node, NodeId};
use tracing::info;

impl NodeService {
    pub(crate) async fn set_subset(&self, node: &mut Node, request: &UpdateRequest) -> NodeResult<()> {
        let parent_id = NodeId::parse(request.get("parent_node").unwrap_or_default())?;
        let ids = request
            .files
            .get("subset_indices")
            .ok_or_else(|| NodeError::invalid("parent_node requires a subset_indices file"))?;

        // an empty id list selects nothing: the node gets an empty file
        if tokio::fs::metadata(&ids.path).await?.len() == 0 {
            let dest = self.storage.layout().data_path(&node.id);
            self.install(&ids.path, &dest).await?;
            let digest = self.storage.digest_file(&dest).await?;
            node.set_file("", digest.size, digest.checksum.to_hex(), self.config.chunk_size);
            return Ok(());
        }

        let parent_index = request
            .get("parent_index")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| NodeError::invalid("parent_node requires the parent_index parameter"))?
            .to_string();
        let parent = self
            .metadata
            .get_node(&parent_id)
            .await?
            .ok_or_else(|| NodeError::invalid(format!("parent node {parent_id} does not exist")))?;
        if parent.is_virtual() {
            return Err(NodeError::invalid(
                "subset nodes cannot be derived from virtual nodes",
            ));
        }
        if matches!(parent.body, NodeBody::Subset(_)) {
            return Err(NodeError::invalid(
                "subset nodes cannot be derived from other subset nodes",
            ));
        }

        let layout = self.storage.layout();
        let parent_idx = layout.index_path(&parent.id, &parent_index)?;
        if !parent.indexes.contains_key(&parent_index) || !self.storage.exists(&parent_idx).await? {
            return Err(shoal_core::Error::IndexNotFound(format!(
                "{parent_index} on node {parent_id}"
            ))
            .into());
        }

        let out = layout.index_path(&node.id, &parent_index)?;
        let companion = layout.subset_index_path(&node.id);
        let ids_path = ids.path.clone();
        let (out_path, companion_path) = (out.clone(), companion.clone());
        let built = blocking(move || {
            let parent = DynamicIdx::open(&parent_idx)?;
            Ok(subset::build(&ids_path, &parent, &out_path, Some(&companion_path))?)
        })
        .await;
        let _ = self.storage.remove_file(&ids.path).await;

        let outcome = match built {
            Ok(outcome) if outcome.index.count > 0 => outcome,
            other => {
                let _ = self.storage.remove_file(&out).await;
                let _ = self.storage.remove_file(&companion).await;
                other?;
                return Err(shoal_core::Error::EmptyIndex.into());
            }
        };

        let avg = outcome.index.avg_unit_size();
        node.body = NodeBody::Subset(SubsetState {
            parent: SubsetParent {
                id: parent_id,
                index_name: parent_index.clone(),
            },
            index: SubsetIndexInfo {
                path: companion,
                total_units: outcome.compressed_count.unwrap_or(outcome.index.count),
                avg_unit_size: avg,
                format: FORMAT_ARRAY.to_string(),
            },
        });
        node.file.path = Some(self.data_location(&parent));
        node.file.format = parent.file.format.clone();

        let segments = self.concrete_segments(node).await?;
        let digest = self.storage.digest_segments(segments).await?;
        node.set_file(
            parent.file.name.clone(),
            digest.size,
            digest.checksum.to_hex(),
            self.config.chunk_size,
        );
        node.indexes.insert(
            parent_index.clone(),
            IdxInfo::new("subset", outcome.index.count, avg, FORMAT_ARRAY),
        );
        info!(
            node_id = %node.id,
            parent = %parent_id,
            index = %parent_index,
            records = outcome.index.count,
            "subset node derived"
        );
        Ok(())
    }
}
