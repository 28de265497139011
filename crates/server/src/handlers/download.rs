//! File download handler.

use crate::auth::Caller;
use crate::error::{ApiError, ApiResult};
use crate::handlers::parse_node_id;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use serde::Deserialize;
use shoal_core::{PartSpec, Right};

/// Download query: the whole file, or `part` of the file through `index`.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    pub index: Option<String>,
    pub part: Option<String>,
}

/// Attachment file name with characters that would break the header quoted out.
fn attachment(file_name: &str) -> String {
    let name: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{name}\"")
}

/// GET /v1/nodes/{id}/download
pub async fn download_node(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let id = parse_node_id(&id)?;
    let node = state.service.get(&id).await?;
    caller.authorize(&node, Right::Read)?;

    let spec = match (&query.index, &query.part) {
        (Some(index), Some(part)) => Some((index.as_str(), part.parse::<PartSpec>()?)),
        (None, None) => None,
        (Some(_), None) => {
            return Err(ApiError::BadRequest("index requires a part".to_string()));
        }
        (None, Some(_)) => {
            return Err(ApiError::BadRequest("part requires an index".to_string()));
        }
    };

    let plan = state
        .service
        .plan_download(&node, spec.as_ref().map(|(index, part)| (*index, part)))
        .await?;
    let stream = state.service.open_download(&plan).await?;
    let body = Body::from_stream(stream.map_err(|e| std::io::Error::other(e.to_string())));

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, "application/octet-stream".to_string()),
            (CONTENT_LENGTH, plan.size.to_string()),
            (CONTENT_DISPOSITION, attachment(&plan.file_name)),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_header_escapes_quotes() {
        assert_eq!(attachment("reads.fa"), "attachment; filename=\"reads.fa\"");
        assert_eq!(attachment("a\"b\n"), "attachment; filename=\"a_b_\"");
    }
}
