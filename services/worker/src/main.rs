//! Render-farm worker.
//!
//! Registers itself as a device, then claims and renders tasks for its
//! container class until signaled. Renders and uploads run inside atomic
//! sections, so shutdown is deferred while one is in flight and settles
//! shortly after it ends.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use farm_lifecycle::{listen_for_signals, LifecycleExecutor};
use farm_types::NodeType;
use farm_worker::cache::RenderCache;
use farm_worker::client::JobApiClient;
use farm_worker::config::Config;
use farm_worker::runner::TaskRunner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting renderfarm worker");

    let config = Config::from_env()?;
    info!(
        api_hostname = %config.api_hostname,
        container_name = %config.container_name,
        data_dir = %config.data_dir.display(),
        "Configuration loaded"
    );

    let client = Arc::new(
        JobApiClient::new(
            &config.api_hostname,
            config.api_port,
            &config.api_version,
            config.api_secure,
            &config.access_key,
            &config.data_dir,
        )
        .context("failed to build backend client")?,
    );

    let device = client
        .register_device(NodeType::Worker)
        .await
        .context("device registration failed")?;
    info!(device_id = %device.id, cluster_address = %device.cluster_address, "Device registered");

    let cache = Arc::new(RenderCache::new(
        &config.render_command,
        &config.data_dir,
        config.cache_factor,
    ));

    let executor = LifecycleExecutor::new(Duration::from_secs(config.settle_delay_secs));
    listen_for_signals(&executor);

    let runner = TaskRunner::new(
        client,
        cache,
        executor.clone(),
        config.container_name.clone(),
        Duration::from_secs(config.poll_interval_secs),
        Duration::from_secs(config.close_timeout_secs),
    );

    executor
        .run(move |shutdown| async move { runner.run(shutdown).await })
        .await;

    info!("Worker shutdown complete");
    Ok(())
}
