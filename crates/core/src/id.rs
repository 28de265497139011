//! Node identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Server-generated node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| crate::Error::InvalidNodeId(format!("{s}: {e}")))
    }

    /// Parse a comma-separated id list, skipping empty entries.
    pub fn parse_list(s: &str) -> crate::Result<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Relative directory for this node: the first six hex characters split
    /// into three two-character segments, then the full id.
    pub fn shard_path(&self) -> PathBuf {
        let id = self.0.to_string();
        let mut path = PathBuf::new();
        path.push(&id[0..2]);
        path.push(&id[2..4]);
        path.push(&id[4..6]);
        path.push(&id);
        path
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_path_layout() {
        let id = NodeId::parse("abcdef12-3456-4789-8abc-def012345678").unwrap();
        assert_eq!(
            id.shard_path(),
            PathBuf::from("ab/cd/ef/abcdef12-3456-4789-8abc-def012345678")
        );
    }

    #[test]
    fn test_parse_list_skips_blanks() {
        let a = NodeId::new();
        let b = NodeId::new();
        let ids = NodeId::parse_list(&format!("{a}, ,{b},")).unwrap();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            NodeId::parse("not-a-node"),
            Err(crate::Error::InvalidNodeId(_))
        ));
    }
}
