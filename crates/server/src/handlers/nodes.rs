//! Node CRUD handlers.

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{node_view, parse_node_id};
use crate::multipart::Form;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Extension, Path, Query, Request, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::{NodeId, Right};
use shoal_metadata::NodeQuery;
use tracing::instrument;

/// Default page size for node listings.
const DEFAULT_LIMIT: u64 = 25;
/// Largest page a listing returns.
const MAX_LIMIT: u64 = 1000;

/// Node listing query.
#[derive(Debug, Default, Deserialize)]
pub struct ListNodesQuery {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub tag: Option<String>,
    #[serde(rename = "type")]
    pub node_type: Option<String>,
}

/// One page of nodes.
#[derive(Debug, Serialize)]
pub struct ListNodesResponse {
    pub total_count: u64,
    pub limit: u64,
    pub offset: u64,
    pub data: Vec<Value>,
}

/// Nodes a mutation reads from must be readable by the caller.
async fn authorize_sources(state: &AppState, caller: &Caller, form: &Form) -> ApiResult<()> {
    let mut sources: Vec<NodeId> = Vec::new();
    for key in ["copy_data", "parent_node"] {
        if let Some(raw) = form.param(key) {
            sources.push(parse_node_id(raw)?);
        }
    }
    if form.param("type") == Some("virtual")
        && let Some(list) = form.param("source")
    {
        sources.extend(NodeId::parse_list(list)?);
    }
    for id in sources {
        let source = state.service.get(&id).await?;
        caller.authorize(&source, Right::Read)?;
    }
    Ok(())
}

/// POST /v1/nodes
#[instrument(skip_all, fields(caller = ?caller.name()))]
pub async fn create_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    req: Request,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let form = Form::read(&state, req).await?;
    authorize_sources(&state, &caller, &form).await?;
    let node = state
        .service
        .create(caller.name(), form.update_request())
        .await?;
    Ok((StatusCode::CREATED, Json(node_view(&node)?)))
}

/// GET /v1/nodes
pub async fn list_nodes(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(params): Query<ListNodesQuery>,
) -> ApiResult<Json<ListNodesResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = params.offset.unwrap_or(0);

    let mut query = NodeQuery::all().readable_by(caller.name());
    if let Some(tag) = params.tag {
        query = query.with_tag(tag);
    }
    if let Some(node_type) = params.node_type {
        query = query.with_type(node_type);
    }

    let (nodes, total_count) = state.service.list(&query, limit, offset).await?;
    let data = nodes.iter().map(node_view).collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(ListNodesResponse {
        total_count,
        limit,
        offset,
        data,
    }))
}

/// GET /v1/nodes/{id}
pub async fn get_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_node_id(&id)?;
    let node = state.service.get_for_display(&id).await?;
    caller.authorize(&node, Right::Read)?;
    Ok(Json(node_view(&node)?))
}

/// PUT /v1/nodes/{id}
#[instrument(skip_all, fields(caller = ?caller.name()))]
pub async fn update_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    req: Request,
) -> ApiResult<Json<Value>> {
    let id = parse_node_id(&id)?;
    let node = state.service.get(&id).await?;
    caller.authorize(&node, Right::Write)?;

    let form = Form::read(&state, req).await?;
    if form.params.is_empty() && form.files.is_empty() {
        return Err(ApiError::BadRequest("nothing to update".to_string()));
    }
    authorize_sources(&state, &caller, &form).await?;
    let node = state.service.update(&id, form.update_request()).await?;
    Ok(Json(node_view(&node)?))
}

/// DELETE /v1/nodes/{id}
#[instrument(skip_all, fields(caller = ?caller.name()))]
pub async fn delete_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_node_id(&id)?;
    let node = state.service.get(&id).await?;
    caller.authorize(&node, Right::Delete)?;
    state.service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/nodes/{id}/acl
pub async fn get_acl(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_node_id(&id)?;
    let node = state.service.get(&id).await?;
    caller.authorize(&node, Right::Read)?;
    Ok(Json(serde_json::json!({
        "acl": node.acl,
        "rights": node.acl.check(caller.name()),
    })))
}
