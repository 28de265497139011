//! Shoal node store server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use shoal_core::config::AppConfig;
use shoal_node::spawn_reaper;
use shoal_server::{AppState, create_router};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shoal - an indexed blob store for sequence data
#[derive(Parser, Debug)]
#[command(name = "shoald")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "SHOAL_CONFIG", default_value = "config/shoal.toml")]
    config: String,
}

/// Merge the optional TOML file with `SHOAL_`-prefixed environment variables
/// (`SHOAL_NODE__CHUNK_SIZE=4096` sets `node.chunk_size`).
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(config_path = %path, "No config file found, using defaults and environment");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("SHOAL_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Shoal v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let state = AppState::from_config(config.clone())
        .await
        .context("failed to initialize node service")?;
    state
        .service
        .metadata()
        .health_check()
        .await
        .context("metadata health check failed")?;
    tracing::info!("Node service initialized");

    if config.reaper.enabled {
        let interval = config.reaper.interval();
        let _reaper = spawn_reaper(state.service.clone(), interval);
        tracing::info!(interval_secs = interval.as_secs(), "Reaper task spawned");
    } else {
        tracing::info!("Reaper disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_reads_toml_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shoal.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind = "0.0.0.0:9000"

[node]
chunk_size = 4096
max_revisions = -1
"#,
        )
        .unwrap();

        let config = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.node.chunk_size, 4096);
        assert_eq!(config.node.max_revisions, -1);
        assert_eq!(config.locks.node_lock_timeout_secs, 1800);
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shoal.toml");
        std::fs::write(&path, "[node]\nchunk_size = 0\n").unwrap();
        assert!(load_config(path.to_str().unwrap()).is_err());
    }
}
