//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:7445").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum accepted request body size in bytes for multipart uploads.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Header carrying the caller identity, set by a trusted front proxy.
    /// Requests without it are anonymous.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Enable request tracing.
    #[serde(default)]
    pub enable_tracing: bool,
}

fn default_bind() -> String {
    "127.0.0.1:7445".to_string()
}

fn default_max_upload_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_identity_header() -> String {
    "x-shoal-user".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size: default_max_upload_size(),
            identity_header: default_identity_header(),
            enable_tracing: false,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.identity_header.trim().is_empty() {
            return Err("server.identity_header cannot be empty".to_string());
        }
        if self.max_upload_size == 0 {
            return Err("server.max_upload_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for node directories.
        path: PathBuf,
        /// Directory for in-flight uploads. Defaults to `<path>/tmp`.
        #[serde(default)]
        temp_dir: Option<PathBuf>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/nodes"),
            temp_dir: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err("storage.path cannot be empty".to_string());
                }
                Ok(())
            }
        }
    }

    /// Directory used for staging uploaded files before they are ingested.
    pub fn temp_dir(&self) -> PathBuf {
        match self {
            StorageConfig::Filesystem { path, temp_dir } => {
                temp_dir.clone().unwrap_or_else(|| path.join("tmp"))
            }
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite document store.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only - SQLite cannot force-cancel queries).
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600) // 10 minutes (advisory only)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Node behaviour configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Chunk size for the virtual `size` index and the chunk-record indexer.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Revision history cap. Negative keeps every revision, zero disables history.
    #[serde(default = "default_max_revisions")]
    pub max_revisions: i64,
    /// Prefixes under which server-local files may be ingested with `path`.
    /// Empty disables path ingestion.
    #[serde(default)]
    pub local_paths: Vec<PathBuf>,
    /// Timeout for `upload_url` fetches in seconds.
    #[serde(default = "default_url_fetch_timeout_secs")]
    pub url_fetch_timeout_secs: u64,
    /// samtools binary used to build `bai` indexes.
    #[serde(default = "default_samtools")]
    pub samtools: PathBuf,
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_max_revisions() -> i64 {
    3
}

fn default_url_fetch_timeout_secs() -> u64 {
    300
}

fn default_samtools() -> PathBuf {
    PathBuf::from("samtools")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_revisions: default_max_revisions(),
            local_paths: Vec::new(),
            url_fetch_timeout_secs: default_url_fetch_timeout_secs(),
            samtools: default_samtools(),
        }
    }
}

impl NodeConfig {
    /// Validate node configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("node.chunk_size cannot be 0".to_string());
        }
        if let Some(relative) = self.local_paths.iter().find(|p| !p.is_absolute()) {
            return Err(format!(
                "node.local_paths entries must be absolute, got {}",
                relative.display()
            ));
        }
        Ok(())
    }

    /// Get the URL fetch timeout as a Duration.
    pub fn url_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.url_fetch_timeout_secs)
    }
}

/// Lock manager configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a mutation waits for a node lock before failing.
    #[serde(default = "default_node_lock_timeout_secs")]
    pub node_lock_timeout_secs: u64,
    /// Idle node lock slots older than this are swept.
    #[serde(default = "default_node_max_age_hours")]
    pub node_max_age_hours: u64,
    /// File locks older than this are swept.
    #[serde(default = "default_file_max_age_hours")]
    pub file_max_age_hours: u64,
    /// Index locks older than this are swept.
    #[serde(default = "default_index_max_age_hours")]
    pub index_max_age_hours: u64,
}

fn default_node_lock_timeout_secs() -> u64 {
    1800 // 30 minutes
}

fn default_node_max_age_hours() -> u64 {
    1
}

fn default_file_max_age_hours() -> u64 {
    6
}

fn default_index_max_age_hours() -> u64 {
    6
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            node_lock_timeout_secs: default_node_lock_timeout_secs(),
            node_max_age_hours: default_node_max_age_hours(),
            file_max_age_hours: default_file_max_age_hours(),
            index_max_age_hours: default_index_max_age_hours(),
        }
    }
}

impl LockConfig {
    /// Get the node lock timeout as a Duration.
    pub fn node_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.node_lock_timeout_secs)
    }

    /// Validate lock configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_lock_timeout_secs == 0 {
            return Err("locks.node_lock_timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Background reaper configuration (expired nodes and stale locks).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Run the reaper loop.
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,
    /// Interval in seconds between reaper runs (default: 1 hour).
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval_secs() -> u64 {
    3600
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl ReaperConfig {
    /// Get the reaper interval as a Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Validate reaper configuration.
    pub fn validate(&self) -> Result<(), String> {
        // tokio::time::interval panics on a zero period
        if self.enabled && self.interval_secs == 0 {
            return Err("reaper.interval_secs cannot be 0 when the reaper is enabled".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Node behaviour.
    #[serde(default)]
    pub node: NodeConfig,
    /// Lock manager.
    #[serde(default)]
    pub locks: LockConfig,
    /// Expiration and lock sweeps.
    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl AppConfig {
    /// Create a test configuration rooted at `root`.
    ///
    /// **For testing only.** Disables the reaper and shortens the node lock timeout.
    pub fn for_testing(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem {
                path: root.join("nodes"),
                temp_dir: Some(root.join("tmp")),
            },
            metadata: MetadataConfig::Sqlite {
                path: root.join("metadata.db"),
                query_timeout_secs: None,
            },
            node: NodeConfig::default(),
            locks: LockConfig {
                node_lock_timeout_secs: 5,
                ..LockConfig::default()
            },
            reaper: ReaperConfig {
                enabled: false,
                ..ReaperConfig::default()
            },
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.node.validate()?;
        self.locks.validate()?;
        self.reaper.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.chunk_size, 1048576);
        assert_eq!(config.max_revisions, 3);
        assert!(config.local_paths.is_empty());
    }

    #[test]
    fn test_lock_config_defaults_to_thirty_minutes() {
        let config = LockConfig::default();
        assert_eq!(config.node_lock_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.node_max_age_hours, 1);
        assert_eq!(config.file_max_age_hours, 6);
        assert_eq!(config.index_max_age_hours, 6);
    }

    #[test]
    fn test_app_config_deserialize_partial() {
        let json = r#"{"node": {"max_revisions": -1}, "storage": {"type": "filesystem", "path": "/srv/nodes"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.node.max_revisions, -1);
        assert_eq!(config.node.chunk_size, 1048576);
        assert_eq!(config.storage.temp_dir(), PathBuf::from("/srv/nodes/tmp"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_local_paths() {
        let mut config = AppConfig::default();
        config.node.local_paths = vec![PathBuf::from("relative/dir")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_reaper_interval() {
        let mut config = AppConfig::default();
        config.reaper.interval_secs = 0;
        assert!(config.validate().is_err());
        config.reaper.enabled = false;
        assert!(config.validate().is_ok());
    }
}
