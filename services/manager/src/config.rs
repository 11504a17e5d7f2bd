//! Configuration for the manager.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cluster::ClusterSettings;

/// Manager configuration, loaded from `FARM_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Orchestration engine API endpoint.
    pub engine_endpoint: String,

    /// Directory holding `cert.pem`/`key.pem` for engine mTLS, if any.
    pub certificate_dir: Option<PathBuf>,

    /// Public address the swarm advertises to joining nodes.
    pub advertise_addr: String,

    /// Port the manager listens on for cluster traffic.
    pub manager_port: u16,

    /// Private image registry host.
    pub registry_domain: String,

    /// Whether the registry is served over TLS.
    pub secure_registry: bool,

    pub registry_username: String,
    pub registry_password: String,

    /// Secrets registered with the engine, `NAME=VALUE` pairs.
    pub secrets: BTreeMap<String, String>,

    /// Environment injected into every render service, `NAME=VALUE` pairs.
    pub service_env: BTreeMap<String, String>,

    /// Seconds between autoscaling reconciliation cycles.
    pub cooldown_period_secs: u64,

    /// Seconds between down-node cleanup passes.
    pub cleanup_period_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let engine_endpoint = std::env::var("FARM_ENGINE_ENDPOINT")
            .unwrap_or_else(|_| "https://127.0.0.1:2376".to_string());

        let certificate_dir = std::env::var("FARM_CERTIFICATE_DIR").ok().map(PathBuf::from);

        let advertise_addr =
            std::env::var("FARM_ADVERTISE_ADDR").context("FARM_ADVERTISE_ADDR is required")?;

        let manager_port = std::env::var("FARM_MANAGER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(2377);

        let registry_domain =
            std::env::var("FARM_REGISTRY_DOMAIN").context("FARM_REGISTRY_DOMAIN is required")?;

        let secure_registry = std::env::var("FARM_REGISTRY_SECURE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        let registry_username = std::env::var("FARM_REGISTRY_USERNAME")
            .context("FARM_REGISTRY_USERNAME is required")?;
        let registry_password = std::env::var("FARM_REGISTRY_PASSWORD")
            .context("FARM_REGISTRY_PASSWORD is required")?;

        let secrets = parse_pairs(&std::env::var("FARM_SERVICE_SECRETS").unwrap_or_default())
            .context("FARM_SERVICE_SECRETS must be NAME=VALUE pairs separated by commas")?;

        let service_env = parse_pairs(&std::env::var("FARM_SERVICE_ENV").unwrap_or_default())
            .context("FARM_SERVICE_ENV must be NAME=VALUE pairs separated by commas")?;

        let cooldown_period_secs = std::env::var("FARM_SCALE_COOLDOWN")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let cleanup_period_secs = std::env::var("FARM_NODE_CLEANUP_PERIOD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            engine_endpoint,
            certificate_dir,
            advertise_addr,
            manager_port,
            registry_domain,
            secure_registry,
            registry_username,
            registry_password,
            secrets,
            service_env,
            cooldown_period_secs,
            cleanup_period_secs,
        })
    }

    pub fn cluster_settings(&self) -> ClusterSettings {
        ClusterSettings {
            advertise_addr: self.advertise_addr.clone(),
            manager_port: self.manager_port,
            registry_domain: self.registry_domain.clone(),
            secure_registry: self.secure_registry,
            registry_username: self.registry_username.clone(),
            registry_password: self.registry_password.clone(),
            secrets: self.secrets.clone(),
            environment: self.service_env.clone(),
        }
    }
}

/// Parse `NAME=VALUE,NAME=VALUE` into a map; empty input is an empty map.
fn parse_pairs(input: &str) -> Result<BTreeMap<String, String>> {
    let mut pairs = BTreeMap::new();

    for entry in input.split(',').filter(|entry| !entry.trim().is_empty()) {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("invalid pair: {entry}"))?;
        pairs.insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok(pairs)
}
