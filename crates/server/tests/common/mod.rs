//! Server test utilities.
//! Note: #[allow(dead_code)] because each test file compiles common/ separately.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, Request, StatusCode};
use serde_json::Value;
use shoal_core::config::AppConfig;
use shoal_server::{AppState, create_router};
use std::path::PathBuf;
use tempfile::TempDir;
use tower::ServiceExt;

pub const IDENTITY: &str = "x-shoal-user";
const BOUNDARY: &str = "shoal-test-boundary-7c1f";

/// A test server wrapper with all dependencies.
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    temp_dir: TempDir,
}

/// One multipart field.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

/// A collected response.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        if self.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        }
    }
}

impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);

        let state = AppState::from_config(config)
            .await
            .expect("Failed to create app state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Upload staging directory.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.path().join("tmp")
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Request without a body.
    pub async fn call(&self, method: &str, uri: &str, user: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(IDENTITY, user);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Request without a body, decoded as JSON.
    pub async fn json(&self, method: &str, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
        let response = self.call(method, uri, user).await;
        (response.status, response.json())
    }

    /// Multipart request, decoded as JSON.
    pub async fn multipart(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        parts: &[Part<'_>],
    ) -> (StatusCode, Value) {
        let body = multipart_body(parts);
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(CONTENT_LENGTH, body.len());
        if let Some(user) = user {
            builder = builder.header(IDENTITY, user);
        }
        let response = self.send(builder.body(Body::from(body)).unwrap()).await;
        (response.status, response.json())
    }

    /// Create a node holding `data` and return its id.
    pub async fn upload(&self, user: Option<&str>, name: &str, data: &[u8]) -> String {
        let (status, body) = self
            .multipart("POST", "/v1/nodes", user, &[Part::File("upload", name, data)])
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    /// Wait for a background index build to land in the catalog.
    pub async fn wait_for_index(&self, id: &str, index: &str, user: Option<&str>) -> Value {
        for _ in 0..200 {
            let (status, body) = self
                .json("GET", &format!("/v1/nodes/{id}/indexes"), user)
                .await;
            assert_eq!(status, StatusCode::OK);
            if let Some(info) = body.get(index) {
                return info.clone();
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("index {index} of node {id} was not built in time");
    }
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// FASTA with `records` records; returns the data and each record's `(offset, length)`.
pub fn fasta(records: usize) -> (Vec<u8>, Vec<(usize, usize)>) {
    let mut data = Vec::new();
    let mut spans = Vec::with_capacity(records);
    for i in 0..records {
        let start = data.len();
        let seq = "GATTACA".repeat(3 + i % 5);
        data.extend_from_slice(format!(">seq{i}\n{seq}\n").as_bytes());
        spans.push((start, data.len() - start));
    }
    (data, spans)
}
