//! Database row types.

use crate::error::MetadataResult;
use shoal_core::Node;
use sqlx::FromRow;
use time::OffsetDateTime;

/// A stored node document plus the columns extracted from it for filtering.
#[derive(Debug, Clone, FromRow)]
pub struct NodeRow {
    pub id: String,
    pub node_type: String,
    pub owner: Option<String>,
    pub file_path: Option<String>,
    pub expiration: Option<i64>,
    pub created_on: i64,
    pub document: String,
}

impl NodeRow {
    pub fn from_node(node: &Node) -> MetadataResult<Self> {
        Ok(Self {
            id: node.id.to_string(),
            node_type: node.type_name().to_string(),
            owner: node.acl.owner.clone(),
            file_path: node
                .file
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            expiration: node.expiration.map(OffsetDateTime::unix_timestamp),
            created_on: timestamp_nanos(node.created_on),
            document: serde_json::to_string(node)?,
        })
    }

    pub fn into_node(self) -> MetadataResult<Node> {
        Ok(serde_json::from_str(&self.document)?)
    }
}

/// Nanoseconds since the epoch, saturating outside the i64 range.
pub(crate) fn timestamp_nanos(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos()).unwrap_or(i64::MAX)
}
