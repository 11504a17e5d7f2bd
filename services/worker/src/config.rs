//! Configuration for the worker.

use std::path::PathBuf;

use anyhow::{Context, Result};

/// Worker configuration, loaded from `FARM_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend API hostname.
    pub api_hostname: String,

    pub api_port: u16,

    /// Backend API version path segment.
    pub api_version: String,

    /// Whether the backend is served over TLS.
    pub api_secure: bool,

    /// API key for task-scoped calls.
    pub access_key: String,

    /// Root of the local asset cache.
    pub data_dir: PathBuf,

    /// Container class this worker renders for.
    pub container_name: String,

    /// Render command template with `{scene_path}`, `{sequence_path}`,
    /// `{frame_start}`, `{frame_end}` placeholders.
    pub render_command: String,

    /// Disk-usage percentage above which the jobs cache is purged.
    pub cache_factor: f64,

    /// Seconds between task claim attempts when idle.
    pub poll_interval_secs: u64,

    /// Seconds allowed for the event stream close handshake.
    pub close_timeout_secs: u64,

    /// Seconds of settle delay after an atomic section before shutdown.
    pub settle_delay_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let api_hostname =
            std::env::var("FARM_API_HOSTNAME").context("FARM_API_HOSTNAME is required")?;

        let api_port = std::env::var("FARM_API_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(443);

        let api_version = std::env::var("FARM_API_VERSION").unwrap_or_else(|_| "v1".to_string());

        let api_secure = std::env::var("FARM_API_SECURE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        let access_key = std::env::var("FARM_ACCESS_KEY").context("FARM_ACCESS_KEY is required")?;

        let data_dir = std::env::var("FARM_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/renderfarm"));

        let container_name =
            std::env::var("FARM_CONTAINER_NAME").context("FARM_CONTAINER_NAME is required")?;

        let render_command =
            std::env::var("FARM_RENDER_COMMAND").context("FARM_RENDER_COMMAND is required")?;

        let cache_factor = std::env::var("FARM_CACHE_FACTOR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(90.0);

        let poll_interval_secs = std::env::var("FARM_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        let close_timeout_secs = std::env::var("FARM_CLOSE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let settle_delay_secs = std::env::var("FARM_SETTLE_DELAY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            api_hostname,
            api_port,
            api_version,
            api_secure,
            access_key,
            data_dir,
            container_name,
            render_command,
            cache_factor,
            poll_interval_secs,
            close_timeout_secs,
            settle_delay_secs,
        })
    }
}
