//! HTTP API server for the shoal node store.
//!
//! This crate provides the HTTP surface over [`shoal_node::NodeService`]:
//! - Node creation, update, listing and deletion
//! - Whole-file and index-addressed downloads
//! - Index builds, uploads and deletion
//! - Lock inspection and health

pub mod auth;
pub mod error;
pub mod handlers;
pub mod multipart;
pub mod routes;
pub mod state;

pub use auth::{Caller, TraceId};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
