//! Down-node removal loop.
//!
//! Worker VMs come and go as the farm scales; a node that disappears without
//! leaving the swarm lingers in the member list as `down`. The reaper
//! force-removes those entries on a fixed cleanup interval. Errors are
//! logged and swallowed; a missed pass self-heals on the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::swarm::{SwarmClient, SwarmError};

pub struct NodeReaper {
    swarm: Arc<SwarmClient>,
    cleanup_period: Duration,
}

impl NodeReaper {
    pub fn new(swarm: Arc<SwarmClient>, cleanup_period: Duration) -> Self {
        Self {
            swarm,
            cleanup_period,
        }
    }

    /// Run the cleanup loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            cleanup_period_secs = self.cleanup_period.as_secs(),
            "Starting node reaper"
        );

        let mut interval = tokio::time::interval(self.cleanup_period);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(error) = self.reap_once().await {
                        warn!(error = %error, "Node cleanup pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Node reaper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Remove every node the engine reports as down.
    pub async fn reap_once(&self) -> Result<(), SwarmError> {
        let nodes = self.swarm.list_nodes().await?;

        for node in nodes.into_iter().filter(|node| node.is_down()) {
            match self.swarm.remove_node(&node.id, true).await {
                Ok(()) => debug!(node_id = %node.id, "Removed down node"),
                Err(error) => {
                    warn!(node_id = %node.id, error = %error, "Failed to remove down node");
                }
            }
        }

        Ok(())
    }
}
