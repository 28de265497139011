//! Index catalog handlers.

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{node_view, parse_node_id};
use crate::multipart::Form;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Extension, Path, Request, State};
use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use shoal_core::{IdxInfo, Right};
use shoal_node::{IndexRequest, IndexUpload, JobStatus};
use std::collections::BTreeMap;
use tracing::instrument;

/// Outcome of an index request. Builds that run in the background answer
/// `building`; clients poll the node or `/v1/locks` for the result.
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub status: &'static str,
    pub index: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<IdxInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /v1/nodes/{id}/indexes
pub async fn list_indexes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<Json<BTreeMap<String, IdxInfo>>> {
    let id = parse_node_id(&id)?;
    let node = state.service.get_for_display(&id).await?;
    caller.authorize(&node, Right::Read)?;
    Ok(Json(node.indexes))
}

/// PUT /v1/nodes/{id}/indexes/{name}
///
/// With an `upload` file the request attaches a pre-built index named
/// `name`; otherwise `name` is the index type to build.
#[instrument(skip_all, fields(caller = ?caller.name(), index = %name))]
pub async fn put_index(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
    req: Request,
) -> ApiResult<(StatusCode, Json<IndexResponse>)> {
    let id = parse_node_id(&id)?;
    let node = state.service.get(&id).await?;
    caller.authorize(&node, Right::Write)?;
    let form = Form::read(&state, req).await?;

    if let Some(file) = form.files.get("upload") {
        let upload = IndexUpload {
            name: name.clone(),
            file: file.clone(),
            format: form
                .param("index_format")
                .ok_or_else(|| missing("index_format"))?
                .to_string(),
            avg_unit_size: form
                .parse("avg_unit_size")?
                .ok_or_else(|| missing("avg_unit_size"))?,
            total_units: form
                .parse("total_units")?
                .ok_or_else(|| missing("total_units"))?,
        };
        let info = state.service.upload_index(&id, upload).await?;
        return Ok((
            StatusCode::OK,
            Json(IndexResponse {
                status: "done",
                index: name,
                info: Some(info),
                error: None,
            }),
        ));
    }

    let request = IndexRequest {
        index_type: name.clone(),
        column: form.parse("column")?,
        parent_index: form.param("parent_index").map(str::to_string),
        index_name: form.param("index_name").map(str::to_string),
        ids: form.files.get("subset_indices").cloned(),
        force_rebuild: form
            .param("force_rebuild")
            .is_some_and(|v| matches!(v, "true" | "1" | "yes")),
    };
    let index = match (name.as_str(), &request) {
        ("column", IndexRequest { column: Some(c), .. }) => format!("column{c}"),
        ("subset", IndexRequest { index_name: Some(n), .. }) => n.clone(),
        _ => name,
    };

    let handle = state.service.build_index(&id, request).await?;
    let response = match handle.status() {
        JobStatus::Done(info) => (
            StatusCode::OK,
            IndexResponse {
                status: "done",
                index,
                info: Some(info),
                error: None,
            },
        ),
        JobStatus::Failed(message) => (
            StatusCode::ACCEPTED,
            IndexResponse {
                status: "failed",
                index,
                info: None,
                error: Some(message),
            },
        ),
        JobStatus::Running => (
            StatusCode::ACCEPTED,
            IndexResponse {
                status: "building",
                index,
                info: None,
                error: None,
            },
        ),
    };
    Ok((response.0, Json(response.1)))
}

/// DELETE /v1/nodes/{id}/indexes/{name}
#[instrument(skip_all, fields(caller = ?caller.name(), index = %name))]
pub async fn delete_index(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let id = parse_node_id(&id)?;
    let node = state.service.get(&id).await?;
    caller.authorize(&node, Right::Write)?;
    let node = state.service.delete_index(&id, &name).await?;
    Ok(Json(node_view(&node)?))
}

fn missing(param: &str) -> ApiError {
    ApiError::BadRequest(format!("index upload requires the {param} parameter"))
}
