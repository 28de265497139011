//! Periodic deletion of expired nodes and sweeping of stale locks.

use crate::error::NodeResult;
use crate::locker::SweepStats;
use crate::service::NodeService;
use shoal_metadata::NodeQuery;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Expired nodes handled per reaper pass.
const REAP_BATCH: u64 = 500;

/// Outcome of one reaper pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub expired: usize,
    pub failed: usize,
    pub locks: SweepStats,
}

impl NodeService {
    /// Delete every node whose expiration has passed. Nodes that cannot be
    /// deleted (still referenced, locked) are skipped and counted.
    pub async fn reap_expired(&self, now: OffsetDateTime) -> NodeResult<(usize, usize)> {
        let (expired, _) = self
            .metadata
            .find_nodes(&NodeQuery::expired_before(now), REAP_BATCH, 0)
            .await?;
        let (mut deleted, mut failed) = (0, 0);
        for node in expired {
            match self.delete(&node.id).await {
                Ok(()) => {
                    deleted += 1;
                    info!(node_id = %node.id, "expired node reaped");
                }
                Err(err) => {
                    failed += 1;
                    warn!(node_id = %node.id, error = %err, "failed to reap expired node");
                }
            }
        }
        Ok((deleted, failed))
    }

    /// One reaper pass: expired nodes, then stale locks.
    pub async fn run_reaper_once(&self) -> NodeResult<ReapStats> {
        let (expired, failed) = self.reap_expired(OffsetDateTime::now_utc()).await?;
        let locks = self.locks.sweep(&self.lock_config);
        Ok(ReapStats {
            expired,
            failed,
            locks,
        })
    }
}

/// Run the reaper every `interval` until the runtime shuts down.
pub fn spawn_reaper(service: NodeService, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match service.run_reaper_once().await {
                Ok(stats) if stats.expired > 0 || stats.failed > 0 => {
                    info!(
                        expired = stats.expired,
                        failed = stats.failed,
                        "reaper pass finished"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "reaper pass failed"),
            }
        }
    })
}
