//! Request parameters and multipart uploads.
//!
//! Parameters come from the query string and from plain multipart fields;
//! multipart fields carrying a file name are streamed to the storage temp
//! directory. Staged files the node service did not consume are removed when
//! the [`Form`] is dropped.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use shoal_node::{UpdateRequest, UploadedFile};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Parsed request parameters and staged files.
#[derive(Debug, Default)]
pub struct Form {
    pub params: BTreeMap<String, String>,
    pub files: BTreeMap<String, UploadedFile>,
    staged: Vec<PathBuf>,
}

impl Form {
    /// Read query parameters and, for `multipart/form-data` bodies, every field.
    pub async fn read(state: &AppState, req: Request) -> ApiResult<Self> {
        let Query(params) = Query::<BTreeMap<String, String>>::try_from_uri(req.uri())
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let mut form = Form {
            params,
            files: BTreeMap::new(),
            staged: Vec::new(),
        };

        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));
        if !is_multipart {
            return Ok(form);
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let Some(file_name) = field.file_name().map(str::to_string) else {
                let text = field.text().await.map_err(multipart_error)?;
                form.params.insert(name, text);
                continue;
            };

            let path = state.service.storage().temp_path();
            form.staged.push(path.clone());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
            }
            let mut file = tokio::fs::File::create(&path).await.map_err(io_error)?;
            let mut written = 0u64;
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                written += chunk.len() as u64;
                file.write_all(&chunk).await.map_err(io_error)?;
            }
            file.flush().await.map_err(io_error)?;
            debug!(field = %name, file_name = %file_name, bytes = written, "upload staged");
            form.files.insert(name, UploadedFile::new(file_name, path));
        }
        Ok(form)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Parse an optional parameter.
    pub fn parse<T: std::str::FromStr>(&self, key: &str) -> ApiResult<Option<T>> {
        self.param(key)
            .map(|v| {
                v.parse()
                    .map_err(|_| ApiError::BadRequest(format!("invalid {key}: {v}")))
            })
            .transpose()
    }

    /// The mutation this form describes. Staged files stay owned by the form
    /// so anything left unconsumed is cleaned up with it.
    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            params: self.params.clone(),
            files: self.files.clone(),
        }
    }
}

impl Drop for Form {
    fn drop(&mut self) {
        for path in &self.staged {
            // consumed uploads have already been moved away
            let _ = std::fs::remove_file(path);
        }
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

fn io_error(e: std::io::Error) -> ApiError {
    ApiError::Internal(format!("failed to stage upload: {e}"))
}
