//! Cluster bootstrap and cluster-level resource convergence.
//!
//! The [`ClusterController`] brings a manager node into a usable swarm and
//! keeps secrets and services in a converged, idempotent state. Bootstrap
//! runs a strict order (initialize, drain self, register secrets, registry
//! login) and every mutating step that can legitimately run twice treats
//! the engine's "already in the desired state" status as success. Anything
//! else is fatal and propagates, aborting manager startup.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use farm_types::NodeType;

use crate::swarm::{
    ContainerSpec, NodeSpec, RegistryAuth, ReplicatedMode, ResourceRequirements, ResourceSet,
    SecretCreateRequest, SecretFileTarget, SecretReference, ServiceMode, ServiceSpec, SwarmClient,
    SwarmError, SwarmInitRequest, TaskTemplate,
};

const GIGA: i64 = 1_000_000_000;

/// CPU reservation per render service, in nano-CPUs.
const SERVICE_CPU_RESERVATION: i64 = 2 * GIGA;
/// CPU limit per render service, in nano-CPUs.
const SERVICE_CPU_LIMIT: i64 = 4 * GIGA;
/// Memory reservation per render service, in bytes.
const SERVICE_MEMORY_RESERVATION: i64 = 2 * GIGA;
/// Memory limit per render service, in bytes.
const SERVICE_MEMORY_LIMIT: i64 = 4 * GIGA;
/// Stop grace period in nanoseconds; long enough for an in-flight frame
/// batch to finish rendering before the engine kills the task.
const SERVICE_STOP_GRACE_NS: i64 = 48 * 3600 * GIGA;

/// Errors from cluster bootstrap and convergence.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error("registry error: {0}")]
    Registry(String),
}

/// Settings the controller needs beyond the engine client itself.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
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
    /// Secrets registered with the engine and attached to every service.
    pub secrets: BTreeMap<String, String>,
    /// Environment injected into every render service.
    pub environment: BTreeMap<String, String>,
}

impl ClusterSettings {
    fn registry_base_url(&self) -> String {
        let protocol = if self.secure_registry { "https" } else { "http" };
        format!("{}://{}/v2", protocol, self.registry_domain)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    repositories: Vec<String>,
}

/// Brings a manager node into the cluster and converges cluster resources.
pub struct ClusterController {
    swarm: SwarmClient,
    registry: reqwest::Client,
    settings: ClusterSettings,
}

impl ClusterController {
    pub fn new(swarm: SwarmClient, settings: ClusterSettings) -> Result<Self, ClusterError> {
        let registry = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(SwarmError::Http)?;

        Ok(Self {
            swarm,
            registry,
            settings,
        })
    }

    /// The address joining nodes dial.
    pub fn cluster_address(&self) -> String {
        format!(
            "{}:{}",
            self.settings.advertise_addr, self.settings.manager_port
        )
    }

    /// Run the bootstrap sequence. Safe to run on every manager start.
    pub async fn bootstrap(&self) -> Result<(), ClusterError> {
        self.initialize().await?;
        self.drain_manager().await?;
        self.register_secrets().await?;
        self.login_registry().await?;

        info!(address = %self.cluster_address(), "Cluster bootstrap complete");
        Ok(())
    }

    /// Create the swarm; a node that is already part of one is fine.
    async fn initialize(&self) -> Result<(), ClusterError> {
        let request = SwarmInitRequest {
            listen_addr: format!("0.0.0.0:{}", self.settings.manager_port),
            advertise_addr: self.settings.advertise_addr.clone(),
        };

        match self.swarm.init(&request).await {
            Ok(()) => info!(advertise_addr = %request.advertise_addr, "Swarm initialized"),
            Err(error) if error.is_already_initialized() => {
                debug!("Node already part of a swarm");
            }
            Err(error) => return Err(error.into()),
        }

        // Re-read swarm state so later token reads see the joined cluster.
        self.swarm.inspect().await?;
        Ok(())
    }

    /// Mark our own membership drain-only so the manager takes no workload.
    async fn drain_manager(&self) -> Result<(), ClusterError> {
        let node_id = self.swarm.info().await?.swarm.node_id;
        let node = self.swarm.get_node(&node_id).await?;

        let spec = NodeSpec {
            role: "manager".to_string(),
            availability: "drain".to_string(),
        };
        self.swarm
            .update_node(&node.id, node.version.index, &spec)
            .await?;

        info!(node_id = %node.id, "Manager node drained");
        Ok(())
    }

    /// Register every configured secret; existing secrets are fine.
    async fn register_secrets(&self) -> Result<(), ClusterError> {
        for (name, data) in &self.settings.secrets {
            let request = SecretCreateRequest {
                name: name.to_lowercase(),
                data: base64::engine::general_purpose::STANDARD.encode(data.as_bytes()),
            };

            match self.swarm.create_secret(&request).await {
                Ok(()) => debug!(secret = %request.name, "Secret registered"),
                Err(error) if error.is_already_exists() => {
                    debug!(secret = %request.name, "Secret already registered");
                }
                Err(error) => return Err(error.into()),
            }
        }

        Ok(())
    }

    /// Authenticate the engine against the private image registry.
    async fn login_registry(&self) -> Result<(), ClusterError> {
        let auth = RegistryAuth {
            username: self.settings.registry_username.clone(),
            password: self.settings.registry_password.clone(),
            serveraddress: self.settings.registry_base_url(),
        };

        self.swarm.login(&auth).await?;
        Ok(())
    }

    /// Deployable service classes: the registry's image repositories.
    pub async fn container_names(&self) -> Result<Vec<String>, ClusterError> {
        let url = format!("{}/_catalog", self.settings.registry_base_url());

        let response = self
            .registry
            .get(&url)
            .basic_auth(
                &self.settings.registry_username,
                Some(&self.settings.registry_password),
            )
            .send()
            .await
            .map_err(|e| ClusterError::Registry(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClusterError::Registry(format!(
                "catalog request failed with status {}",
                response.status()
            )));
        }

        let catalog: CatalogResponse = response
            .json()
            .await
            .map_err(|e| ClusterError::Registry(e.to_string()))?;

        Ok(catalog.repositories)
    }

    /// Submit the desired service for a container class; existing is fine.
    ///
    /// Services start at zero replicas; the autoscaler raises them as task
    /// demand arrives.
    pub async fn create_service(&self, container_name: &str) -> Result<(), ClusterError> {
        let secrets = self
            .swarm
            .list_secrets()
            .await?
            .into_iter()
            .map(|secret| SecretReference {
                file: SecretFileTarget::for_secret(&secret.spec.name),
                secret_id: secret.id,
                secret_name: secret.spec.name,
            })
            .collect();

        let env = self
            .settings
            .environment
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();

        let spec = ServiceSpec {
            name: container_name.to_string(),
            task_template: TaskTemplate {
                container_spec: ContainerSpec {
                    image: format!("{}/{}:latest", self.settings.registry_domain, container_name),
                    env,
                    secrets,
                    stop_grace_period: Some(SERVICE_STOP_GRACE_NS),
                },
                resources: Some(ResourceRequirements {
                    reservations: Some(ResourceSet {
                        nano_cpus: SERVICE_CPU_RESERVATION,
                        memory_bytes: SERVICE_MEMORY_RESERVATION,
                    }),
                    limits: Some(ResourceSet {
                        nano_cpus: SERVICE_CPU_LIMIT,
                        memory_bytes: SERVICE_MEMORY_LIMIT,
                    }),
                }),
            },
            mode: ServiceMode {
                replicated: ReplicatedMode { replicas: 0 },
            },
        };

        match self.swarm.create_service(&spec).await {
            Ok(()) => info!(service = %container_name, "Service created"),
            Err(error) if error.is_already_exists() => {
                debug!(service = %container_name, "Service already exists");
            }
            Err(error) => return Err(error.into()),
        }

        Ok(())
    }

    /// Join token for a device's requested role.
    ///
    /// Swarm state is re-read first so recently rotated tokens are never
    /// served stale.
    pub async fn join(&self, node_type: NodeType) -> Result<String, ClusterError> {
        let swarm = self.swarm.inspect().await?;

        Ok(match node_type {
            NodeType::Manager => swarm.join_tokens.manager,
            NodeType::Worker => swarm.join_tokens.worker,
        })
    }

    pub fn swarm(&self) -> &SwarmClient {
        &self.swarm
    }
}
