//! Node document store for shoal.
//!
//! Nodes are persisted as JSON documents, with the fields used for filtering
//! (type, owner, ingested path, expiration, virtual-part references) copied
//! into indexed columns.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{NodeQuery, NodeRepo, Visibility};
pub use store::{MetadataStore, SqliteStore};

use shoal_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            if path.as_os_str().is_empty() {
                return Err(MetadataError::Config(
                    "metadata.path cannot be empty".to_string(),
                ));
            }
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
