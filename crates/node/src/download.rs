//! Download planning: which byte ranges of which files make up a response.

use crate::error::{NodeError, NodeResult};
use crate::locker::IndexKey;
use crate::service::{NodeService, blocking};
use shoal_core::index::{self, IndexSource};
use shoal_core::indexer::FORMAT_ARRAY;
use shoal_core::node::{NodeBody, SIZE_INDEX};
use shoal_core::{DynamicIdx, IndexRecord, Node, PartSpec, SizeIndex};
use shoal_storage::segment::{self, Segment};
use shoal_storage::ByteStream;

/// The resolved byte ranges of a download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadPlan {
    pub file_name: String,
    pub size: u64,
    pub segments: Vec<Segment>,
}

impl NodeService {
    /// Byte ranges of the node's own physical bytes.
    ///
    /// Subset nodes resolve through their compressed companion index into the
    /// parent's data file. Virtual nodes have no physical bytes.
    pub(crate) async fn concrete_segments(&self, node: &Node) -> NodeResult<Vec<Segment>> {
        let data = self.data_location(node);
        match &node.body {
            NodeBody::Virtual => Err(NodeError::Internal(format!(
                "virtual node {} has no physical bytes",
                node.id
            ))),
            NodeBody::Subset(subset) => {
                let companion = subset.index.path.clone();
                let records = blocking(move || {
                    let idx = DynamicIdx::open(&companion)?;
                    let len = idx.count();
                    if len == 0 {
                        return Ok(Vec::new());
                    }
                    Ok(idx.records(1, len)?)
                })
                .await?;
                Ok(records
                    .into_iter()
                    .map(|r| Segment::new(data.clone(), r.offset, r.length))
                    .collect())
            }
            _ => Ok(vec![Segment::whole(data, node.file.size)]),
        }
    }

    /// Byte ranges of the node's logical file, following virtual parts.
    pub async fn logical_segments(&self, node: &Node) -> NodeResult<Vec<Segment>> {
        if !node.is_virtual() {
            return self.concrete_segments(node).await;
        }
        let mut segments = Vec::new();
        for id in &node.file.virtual_parts {
            let part = self.get(id).await?;
            segments.extend(self.concrete_segments(&part).await?);
        }
        Ok(segments)
    }

    /// Plan a download of the whole file or of `part` through the named index.
    pub async fn plan_download(
        &self,
        node: &Node,
        part: Option<(&str, &PartSpec)>,
    ) -> NodeResult<DownloadPlan> {
        if !node.has_file() {
            return Err(NodeError::NotFound(format!("node {} has no file", node.id)));
        }
        if self.locks.files.get(&node.id).is_some() {
            return Err(NodeError::FileLocked(node.id));
        }

        let segments = match part {
            None => self.logical_segments(node).await?,
            Some((index_name, spec)) => self.part_segments(node, index_name, spec).await?,
        };
        Ok(DownloadPlan {
            file_name: node.file.name.clone(),
            size: segment::total_len(&segments),
            segments,
        })
    }

    async fn part_segments(
        &self,
        node: &Node,
        index_name: &str,
        spec: &PartSpec,
    ) -> NodeResult<Vec<Segment>> {
        if self
            .locks
            .indexes
            .get(&IndexKey::new(node.id, index_name))
            .is_some()
        {
            return Err(NodeError::IndexLocked {
                id: node.id,
                index: index_name.to_string(),
            });
        }
        let info = node
            .indexes
            .get(index_name)
            .ok_or_else(|| shoal_core::Error::IndexNotFound(index_name.to_string()))?;

        if index_name == SIZE_INDEX {
            let sizes = SizeIndex::new(info.avg_unit_size, node.file.size);
            let record = index::part(&sizes, spec)?;
            let logical = self.logical_segments(node).await?;
            return Ok(segment::slice(&logical, record.offset, record.length));
        }

        // bai and other opaque formats are not (offset, length) arrays
        if info.format != FORMAT_ARRAY {
            return Err(NodeError::invalid(format!(
                "index {index_name} has format {} and cannot address parts",
                info.format
            )));
        }

        let path = self.storage.layout().index_path(&node.id, index_name)?;
        if !self.storage.exists(&path).await? {
            return Err(shoal_core::Error::IndexNotFound(index_name.to_string()).into());
        }
        let gapped = info.index_type == "subset";
        let spec = *spec;
        let records: Vec<IndexRecord> = blocking(move || {
            let idx = DynamicIdx::open(&path)?;
            if gapped {
                Ok(index::range(&idx, &spec)?)
            } else {
                Ok(vec![index::part(&idx, &spec)?])
            }
        })
        .await?;

        // a subset node's parent index addresses the parent's data file directly
        let direct = matches!(&node.body, NodeBody::Subset(s) if s.parent.index_name == index_name);
        if direct {
            let data = self.data_location(node);
            return Ok(records
                .into_iter()
                .map(|r| Segment::new(data.clone(), r.offset, r.length))
                .collect());
        }
        let logical = self.logical_segments(node).await?;
        Ok(records
            .into_iter()
            .flat_map(|r| segment::slice(&logical, r.offset, r.length))
            .collect())
    }

    /// Stream the bytes of a plan.
    pub async fn open_download(&self, plan: &DownloadPlan) -> NodeResult<ByteStream> {
        Ok(self.storage.read_segments(plan.segments.clone()).await?)
    }
}
