//! Lock inspection.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;
use shoal_core::NodeId;
use time::OffsetDateTime;

#[derive(Debug, Serialize)]
pub struct NodeLockEntry {
    pub id: NodeId,
    #[serde(with = "time::serde::rfc3339")]
    pub locked_on: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct FileLockEntry {
    pub id: NodeId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IndexLockEntry {
    pub id: NodeId,
    pub index: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_on: OffsetDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every lock currently held.
#[derive(Debug, Serialize)]
pub struct LocksResponse {
    pub nodes: Vec<NodeLockEntry>,
    pub files: Vec<FileLockEntry>,
    pub indexes: Vec<IndexLockEntry>,
}

/// GET /v1/locks
pub async fn list_locks(State(state): State<AppState>) -> Json<LocksResponse> {
    let locks = state.service.locks();
    let nodes = locks
        .nodes
        .locked()
        .into_iter()
        .map(|(id, locked_on)| NodeLockEntry { id, locked_on })
        .collect();
    let files = locks
        .files
        .all()
        .into_iter()
        .map(|(id, info)| FileLockEntry {
            id,
            created_on: info.created_on,
            error: info.error,
        })
        .collect();
    let indexes = locks
        .indexes
        .all()
        .into_iter()
        .map(|(key, info)| IndexLockEntry {
            id: key.node,
            index: key.index,
            created_on: info.created_on,
            error: info.error,
        })
        .collect();
    Json(LocksResponse {
        nodes,
        files,
        indexes,
    })
}
