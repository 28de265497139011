//! HTTP request handlers.

pub mod download;
pub mod health;
pub mod indexes;
pub mod locks;
pub mod nodes;

pub use download::*;
pub use health::*;
pub use indexes::*;
pub use locks::*;
pub use nodes::*;

use crate::error::{ApiError, ApiResult};
use serde_json::Value;
use shoal_core::{Node, NodeId};

/// Parse a node id from a path segment.
pub fn parse_node_id(raw: &str) -> ApiResult<NodeId> {
    NodeId::parse(raw).map_err(|_| ApiError::BadRequest(format!("invalid node id: {raw}")))
}

/// Client view of a node: server-side paths are removed, here and in every
/// revision.
pub fn node_view(node: &Node) -> ApiResult<Value> {
    let mut value = serde_json::to_value(node)
        .map_err(|e| ApiError::Internal(format!("failed to serialize node: {e}")))?;
    redact(&mut value);
    Ok(value)
}

fn redact(value: &mut Value) {
    if let Some(file) = value.get_mut("file").and_then(Value::as_object_mut) {
        file.remove("path");
    }
    if let Some(index) = value
        .get_mut("body")
        .and_then(|body| body.get_mut("index"))
        .and_then(Value::as_object_mut)
    {
        index.remove("path");
    }
    if let Some(revisions) = value.get_mut("revisions").and_then(Value::as_array_mut) {
        revisions.iter_mut().for_each(redact);
    }
}
