//! Application state shared across handlers.

use shoal_core::config::AppConfig;
use shoal_node::NodeService;
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Configuration.
    pub config: Arc<AppConfig>,
    /// Node service (storage, metadata and locks behind it).
    pub service: NodeService,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: AppConfig, service: NodeService) -> Self {
        Self {
            config: Arc::new(config),
            service,
        }
    }

    /// Build the node service from `config` and wrap it.
    pub async fn from_config(config: AppConfig) -> shoal_node::NodeResult<Self> {
        let service = NodeService::from_config(&config).await?;
        Ok(Self::new(config, service))
    }
}
