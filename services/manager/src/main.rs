//! Render-farm manager.
//!
//! Bootstraps the swarm once at startup, creates one service per deployable
//! container class, then keeps replica counts reconciled against task demand
//! and reaps nodes that have gone down. A bootstrap failure aborts the
//! process with a non-zero exit; reconciliation failures self-heal on the
//! next cycle and are visible only in logs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use farm_lifecycle::{listen_for_signals, LifecycleExecutor};
use farm_manager::autoscaler::{Autoscaler, ServiceScaler};
use farm_manager::cluster::ClusterController;
use farm_manager::config::Config;
use farm_manager::reaper::NodeReaper;
use farm_manager::swarm::SwarmClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting renderfarm manager");

    let config = Config::from_env()?;
    info!(
        engine_endpoint = %config.engine_endpoint,
        advertise_addr = %config.advertise_addr,
        registry = %config.registry_domain,
        "Configuration loaded"
    );

    let swarm = Arc::new(
        SwarmClient::new(&config.engine_endpoint, config.certificate_dir.as_deref())
            .context("failed to build engine client")?,
    );

    let controller = ClusterController::new((*swarm).clone(), config.cluster_settings())?;

    // Fatal on any non-idempotent failure: a manager that cannot converge
    // its cluster must not come up half-initialized.
    if let Err(bootstrap_error) = controller.bootstrap().await {
        error!(error = %bootstrap_error, "Cluster bootstrap failed");
        anyhow::bail!("cluster bootstrap failed: {bootstrap_error}");
    }

    let container_names = controller
        .container_names()
        .await
        .context("failed to list registry containers")?;
    info!(count = container_names.len(), "Deployable container classes");

    for container_name in &container_names {
        controller
            .create_service(container_name)
            .await
            .with_context(|| format!("failed to create service {container_name}"))?;
    }

    let executor = LifecycleExecutor::default();
    listen_for_signals(&executor);

    let scaler: Arc<dyn ServiceScaler> = Arc::clone(&swarm) as Arc<dyn ServiceScaler>;
    let autoscaler = Arc::new(Autoscaler::new(
        scaler,
        Duration::from_secs(config.cooldown_period_secs),
    ));
    tokio::spawn({
        let autoscaler = Arc::clone(&autoscaler);
        let shutdown = executor.shutdown_signal();
        async move { autoscaler.run(shutdown).await }
    });

    let reaper = NodeReaper::new(
        Arc::clone(&swarm),
        Duration::from_secs(config.cleanup_period_secs),
    );
    executor
        .run(move |shutdown| async move { reaper.run(shutdown).await })
        .await;

    info!("Manager shutdown complete");
    Ok(())
}
