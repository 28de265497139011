//! Node document repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use shoal_core::{Node, NodeId};
use time::OffsetDateTime;

/// Which nodes a caller may see in listings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    /// No ACL filtering.
    #[default]
    All,
    /// Nodes the caller (`None` is anonymous) holds the read right on.
    ReadableBy(Option<String>),
}

/// Filter over stored nodes. Every set field must match.
#[derive(Clone, Debug, Default)]
pub struct NodeQuery {
    pub ids: Option<Vec<NodeId>>,
    /// Virtual nodes listing this id among their parts.
    pub references_part: Option<NodeId>,
    /// Nodes whose file was ingested from this server-local path.
    pub file_path: Option<String>,
    /// Nodes whose expiration is at or before this instant.
    pub expired_before: Option<OffsetDateTime>,
    pub tag: Option<String>,
    pub node_type: Option<String>,
    pub visibility: Visibility,
}

impl NodeQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ids(ids: Vec<NodeId>) -> Self {
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn referencing(part: NodeId) -> Self {
        Self {
            references_part: Some(part),
            ..Self::default()
        }
    }

    pub fn file_path(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn expired_before(at: OffsetDateTime) -> Self {
        Self {
            expired_before: Some(at),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn readable_by(mut self, caller: Option<&str>) -> Self {
        self.visibility = Visibility::ReadableBy(caller.map(str::to_string));
        self
    }
}

/// Repository for node documents.
#[async_trait]
pub trait NodeRepo: Send + Sync {
    /// Insert or replace a node document and its virtual-part references.
    async fn upsert_node(&self, node: &Node) -> MetadataResult<()>;

    /// Get a node by id.
    async fn get_node(&self, id: &NodeId) -> MetadataResult<Option<Node>>;

    /// List nodes matching `query`, newest first, with the total match count.
    async fn find_nodes(
        &self,
        query: &NodeQuery,
        limit: u64,
        offset: u64,
    ) -> MetadataResult<(Vec<Node>, u64)>;

    /// Count nodes matching `query`.
    async fn count_nodes(&self, query: &NodeQuery) -> MetadataResult<u64>;

    /// Delete a node document. Returns `NotFound` if it does not exist.
    async fn delete_node(&self, id: &NodeId) -> MetadataResult<()>;
}
