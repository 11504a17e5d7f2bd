//! Typed client for the orchestration engine's HTTP API.
//!
//! Talks to the Docker Engine endpoint the manager node exposes, optionally
//! authenticating with a mutual-TLS certificate/key pair from disk. Every
//! response the manager consumes is modeled as an explicit struct; nothing is
//! read out of untyped maps.
//!
//! Idempotency signals surface on [`SwarmError`]: the engine answers `503`
//! when the node is already part of a swarm and `409` when a named resource
//! already exists. Callers that may legitimately run twice treat exactly
//! those statuses as success.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// HTTP status the engine uses for "node already part of a swarm".
const STATUS_ALREADY_INITIALIZED: u16 = 503;
/// HTTP status the engine uses for "resource already exists".
const STATUS_ALREADY_EXISTS: u16 = 409;

/// Errors from the orchestration engine API.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("engine API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("engine transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("client certificate error: {0}")]
    Certificate(String),

    #[error("unexpected engine response: {0}")]
    Decode(String),
}

impl SwarmError {
    /// Whether the error is the engine's "already part of a swarm" answer.
    pub fn is_already_initialized(&self) -> bool {
        matches!(self, SwarmError::Api { status, .. } if *status == STATUS_ALREADY_INITIALIZED)
    }

    /// Whether the error is the engine's "resource already exists" answer.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, SwarmError::Api { status, .. } if *status == STATUS_ALREADY_EXISTS)
    }
}

// =============================================================================
// Engine wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmInitRequest {
    pub listen_addr: String,
    pub advertise_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmInspect {
    pub join_tokens: JoinTokens,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinTokens {
    pub worker: String,
    pub manager: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    pub swarm: SwarmStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmStatus {
    #[serde(rename = "NodeID")]
    pub node_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: ObjectVersion,
    pub spec: NodeSpec,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeSpec {
    pub role: String,
    pub availability: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeStatus {
    pub state: String,
}

impl NodeDescriptor {
    /// Whether the engine reports this node as unreachable.
    pub fn is_down(&self) -> bool {
        self.status.state == "down"
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretCreateRequest {
    pub name: String,
    /// Base64-encoded secret payload, as the engine wire format requires.
    pub data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    pub spec: SecretSpec,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretSpec {
    pub name: String,
}

/// Desired service submitted to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    pub name: String,
    pub task_template: TaskTemplate,
    pub mode: ServiceMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskTemplate {
    pub container_spec: ContainerSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretReference>,
    /// Nanoseconds the engine waits for a task to stop before killing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_period: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretReference {
    #[serde(rename = "SecretID")]
    pub secret_id: String,
    pub secret_name: String,
    pub file: SecretFileTarget,
}

/// In-container mount target for an attached secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecretFileTarget {
    pub name: String,
    #[serde(rename = "UID")]
    pub uid: String,
    #[serde(rename = "GID")]
    pub gid: String,
    pub mode: u32,
}

impl SecretFileTarget {
    /// Engine default target: world-readable file named after the secret.
    pub fn for_secret(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: "0".to_string(),
            gid: "0".to_string(),
            mode: 0o444,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSet>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceSet {
    #[serde(rename = "NanoCPUs")]
    pub nano_cpus: i64,
    pub memory_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceMode {
    pub replicated: ReplicatedMode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReplicatedMode {
    pub replicas: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: ObjectVersion,
    pub spec: ServiceSpec,
}

impl ServiceDescriptor {
    pub fn replicas(&self) -> u64 {
        self.spec.mode.replicated.replicas
    }
}

#[derive(Debug, Serialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
    pub serveraddress: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

// =============================================================================
// Client
// =============================================================================

/// Orchestration engine API client.
#[derive(Clone)]
pub struct SwarmClient {
    client: reqwest::Client,
    base_url: String,
}

impl SwarmClient {
    /// Connect to the engine endpoint, with mTLS when a certificate
    /// directory is given (`cert.pem` + `key.pem` inside it).
    pub fn new(endpoint: &str, certificate_dir: Option<&Path>) -> Result<Self, SwarmError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));

        if let Some(dir) = certificate_dir {
            let mut pem = std::fs::read(dir.join("cert.pem"))
                .map_err(|e| SwarmError::Certificate(format!("cert.pem: {e}")))?;
            pem.extend(
                std::fs::read(dir.join("key.pem"))
                    .map_err(|e| SwarmError::Certificate(format!("key.pem: {e}")))?,
            );

            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| SwarmError::Certificate(e.to_string()))?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder.build()?,
            base_url: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, SwarmError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| SwarmError::Decode(e.to_string()));
        }

        Err(Self::api_error(status.as_u16(), response).await)
    }

    async fn check_empty(response: reqwest::Response) -> Result<(), SwarmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(Self::api_error(status.as_u16(), response).await)
    }

    async fn api_error(status: u16, response: reqwest::Response) -> SwarmError {
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.message,
            Err(_) => "unknown engine error".to_string(),
        };
        SwarmError::Api { status, message }
    }

    /// Create a new swarm advertising `advertise_addr`.
    pub async fn init(&self, request: &SwarmInitRequest) -> Result<(), SwarmError> {
        debug!(advertise_addr = %request.advertise_addr, "Initializing swarm");
        let response = self
            .client
            .post(self.url("/swarm/init"))
            .json(request)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    /// Read current swarm state, including join tokens.
    pub async fn inspect(&self) -> Result<SwarmInspect, SwarmError> {
        let response = self.client.get(self.url("/swarm")).send().await?;
        Self::check(response).await
    }

    /// Engine-wide info; carries this node's swarm node id.
    pub async fn info(&self) -> Result<SystemInfo, SwarmError> {
        let response = self.client.get(self.url("/info")).send().await?;
        Self::check(response).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeDescriptor>, SwarmError> {
        let response = self.client.get(self.url("/nodes")).send().await?;
        Self::check(response).await
    }

    pub async fn get_node(&self, id: &str) -> Result<NodeDescriptor, SwarmError> {
        let response = self
            .client
            .get(self.url(&format!("/nodes/{id}")))
            .send()
            .await?;
        Self::check(response).await
    }

    /// Replace a node's spec; `version` must be the descriptor's current one.
    pub async fn update_node(
        &self,
        id: &str,
        version: u64,
        spec: &NodeSpec,
    ) -> Result<(), SwarmError> {
        let response = self
            .client
            .post(self.url(&format!("/nodes/{id}/update")))
            .query(&[("version", version)])
            .json(spec)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    pub async fn remove_node(&self, id: &str, force: bool) -> Result<(), SwarmError> {
        let response = self
            .client
            .delete(self.url(&format!("/nodes/{id}")))
            .query(&[("force", force)])
            .send()
            .await?;
        Self::check_empty(response).await
    }

    pub async fn create_secret(&self, request: &SecretCreateRequest) -> Result<(), SwarmError> {
        let response = self
            .client
            .post(self.url("/secrets/create"))
            .json(request)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    pub async fn list_secrets(&self) -> Result<Vec<SecretDescriptor>, SwarmError> {
        let response = self.client.get(self.url("/secrets")).send().await?;
        Self::check(response).await
    }

    pub async fn create_service(&self, spec: &ServiceSpec) -> Result<(), SwarmError> {
        debug!(service = %spec.name, "Creating service");
        let response = self
            .client
            .post(self.url("/services/create"))
            .json(spec)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    /// Fetch a service by id or name.
    pub async fn get_service(&self, name: &str) -> Result<ServiceDescriptor, SwarmError> {
        let response = self
            .client
            .get(self.url(&format!("/services/{name}")))
            .send()
            .await?;
        Self::check(response).await
    }

    /// Scale a service to an absolute replica count.
    pub async fn scale_service(&self, name: &str, replicas: u64) -> Result<(), SwarmError> {
        let mut service = self.get_service(name).await?;
        service.spec.mode.replicated.replicas = replicas;

        let response = self
            .client
            .post(self.url(&format!("/services/{}/update", service.id)))
            .query(&[("version", service.version.index)])
            .json(&service.spec)
            .send()
            .await?;
        Self::check_empty(response).await
    }

    /// Authenticate the engine against a private image registry.
    pub async fn login(&self, auth: &RegistryAuth) -> Result<(), SwarmError> {
        debug!(registry = %auth.serveraddress, "Logging engine into registry");
        let response = self.client.post(self.url("/auth")).json(auth).send().await?;
        Self::check_empty(response).await
    }
}
