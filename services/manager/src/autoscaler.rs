//! Replica-count reconciliation against fluctuating task demand.
//!
//! Producers call [`Autoscaler::request_scale`] from request-handling
//! contexts; the call only touches an in-memory accumulator and never blocks
//! on the network. A background loop wakes on a fixed cooldown, drains the
//! accumulated deltas and applies `target = max(current + delta, 0)` per
//! service. Requests arriving between two cycles sum algebraically, which
//! bounds the engine API call rate independent of request burst rate.
//!
//! A failed scale RPC re-adds its delta, so the next cycle retries the same
//! net adjustment; nothing is silently dropped, and one failing service
//! never blocks reconciliation of the others. The accumulator lock is never
//! held across a network call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::swarm::{SwarmClient, SwarmError};

/// Engine seam the reconciliation loop scales through.
#[async_trait]
pub trait ServiceScaler: Send + Sync {
    async fn current_replicas(&self, service: &str) -> Result<u64, SwarmError>;

    async fn scale(&self, service: &str, replicas: u64) -> Result<(), SwarmError>;
}

#[async_trait]
impl ServiceScaler for SwarmClient {
    async fn current_replicas(&self, service: &str) -> Result<u64, SwarmError> {
        Ok(self.get_service(service).await?.replicas())
    }

    async fn scale(&self, service: &str, replicas: u64) -> Result<(), SwarmError> {
        self.scale_service(service, replicas).await
    }
}

/// Accumulates scale requests and reconciles them on a cooldown.
pub struct Autoscaler {
    scaler: Arc<dyn ServiceScaler>,
    /// Signed replica delta per service name.
    requests: Mutex<HashMap<String, i64>>,
    cooldown: Duration,
}

impl Autoscaler {
    pub fn new(scaler: Arc<dyn ServiceScaler>, cooldown: Duration) -> Self {
        Self {
            scaler,
            requests: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    /// Record a replica delta for `service`. Never blocks on the network.
    pub fn request_scale(&self, service: &str, task_count: u32, up: bool) {
        let delta = if up {
            i64::from(task_count)
        } else {
            -i64::from(task_count)
        };

        let mut requests = self.requests.lock().expect("accumulator lock poisoned");
        *requests.entry(service.to_string()).or_insert(0) += delta;
    }

    /// Net delta currently accumulated for `service`.
    pub fn pending_delta(&self, service: &str) -> i64 {
        let requests = self.requests.lock().expect("accumulator lock poisoned");
        requests.get(service).copied().unwrap_or(0)
    }

    /// Run the reconciliation loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            cooldown_secs = self.cooldown.as_secs(),
            "Starting autoscaling loop"
        );

        let mut interval = tokio::time::interval(self.cooldown);
        // Don't reconcile immediately on startup - wait for the first cooldown.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.reconcile_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Autoscaling loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Drain the accumulator and apply every nonzero delta.
    pub async fn reconcile_once(&self) {
        // Snapshot-and-zero under the lock; the scale RPCs run without it so
        // producers are never blocked for the duration of a network call.
        let pending: Vec<(String, i64)> = {
            let mut requests = self.requests.lock().expect("accumulator lock poisoned");
            requests
                .iter_mut()
                .filter(|(_, delta)| **delta != 0)
                .map(|(service, delta)| {
                    let taken = *delta;
                    *delta = 0;
                    (service.clone(), taken)
                })
                .collect()
        };

        for (service, delta) in pending {
            match self.apply(&service, delta).await {
                Ok(target) => {
                    debug!(service = %service, delta, target, "Service scaled");
                }
                Err(error) => {
                    // Retain the delta; the next cycle retries the same net
                    // adjustment, merged with anything that arrived meanwhile.
                    warn!(service = %service, delta, error = %error, "Scale failed, retaining delta");
                    let mut requests = self.requests.lock().expect("accumulator lock poisoned");
                    *requests.entry(service).or_insert(0) += delta;
                }
            }
        }
    }

    async fn apply(&self, service: &str, delta: i64) -> Result<u64, SwarmError> {
        let current = self.scaler.current_replicas(service).await?;
        let target = (current as i64 + delta).max(0) as u64;

        self.scaler.scale(service, target).await?;
        Ok(target)
    }
}
