//! Backend job API client for the worker.
//!
//! Task-scoped calls authenticate with an `x-api-key` header. Scene assets
//! stream straight into the job-scoped cache directory; task outputs upload
//! as one multipart request per task.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use farm_types::{DeviceRecord, DeviceRegistration, NodeType, Task, TaskState};

/// Backend API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("job {job_id} has no scene url")]
    MissingSceneUrl { job_id: String },

    #[error("unparseable resource url: {0}")]
    InvalidResourceUrl(String),

    #[error("invalid access key")]
    InvalidAccessKey,
}

#[derive(Debug, Serialize)]
struct TaskStateRequest {
    state: TaskState,
}

/// Typed client for the backend job/device API.
pub struct JobApiClient {
    client: reqwest::Client,
    base_url: String,
    data_dir: PathBuf,
}

impl JobApiClient {
    /// Build a client for `{protocol}://{hostname}:{port}/{version}`.
    pub fn new(
        hostname: &str,
        port: u16,
        version: &str,
        secure: bool,
        access_key: &str,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(access_key).map_err(|_| ApiError::InvalidAccessKey)?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        let protocol = if secure { "https" } else { "http" };

        Ok(Self {
            client,
            base_url: format!("{protocol}://{hostname}:{port}/{version}"),
            data_dir: data_dir.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// WebSocket endpoint for a job's event stream.
    pub fn job_events_url(&self, job_id: &str) -> String {
        let base = self
            .base_url
            .replacen("http", "ws", 1);
        format!("{base}/jobs/{job_id}/events")
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Api {
            status: status.as_u16(),
            body,
        })
    }

    /// Register this node with the backend.
    pub async fn register_device(&self, node_type: NodeType) -> Result<DeviceRecord, ApiError> {
        let registration = DeviceRegistration { node_type };

        let response = self
            .client
            .post(self.url("devices"))
            .json(&registration)
            .send()
            .await?;
        Self::check(response).await
    }

    pub async fn get_device(&self, id: &str) -> Result<DeviceRecord, ApiError> {
        let response = self.client.get(self.url(&format!("devices/{id}"))).send().await?;
        Self::check(response).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, ApiError> {
        let response = self.client.get(self.url(&format!("tasks/{id}"))).send().await?;
        Self::check(response).await
    }

    /// Claim the next queued task for a container class, if any.
    pub async fn poll_task(&self, container_name: &str) -> Result<Option<Task>, ApiError> {
        let response = self
            .client
            .post(self.url("tasks/claim"))
            .json(&serde_json::json!({ "container_name": container_name }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        Ok(Some(Self::check(response).await?))
    }

    /// Request a task state transition.
    ///
    /// Returns whether the backend's response echoes the requested state,
    /// the caller's only confirmation that the transition took effect.
    pub async fn update_task_state(&self, task: &Task, state: TaskState) -> Result<bool, ApiError> {
        let response = self
            .client
            .post(self.url(&format!("tasks/{}", task.id)))
            .json(&TaskStateRequest { state })
            .send()
            .await?;

        let updated: Task = Self::check(response).await?;
        Ok(updated.state == state)
    }

    /// Stream the job's scene asset into the job-scoped cache directory.
    ///
    /// Returns the staged file path, derived from the last two segments of
    /// the resource url (`jobs/{id}/{filename}`).
    pub async fn download_scene(&self, task: &Task) -> Result<PathBuf, ApiError> {
        let scene_url =
            task.job
                .scene_url
                .as_deref()
                .ok_or_else(|| ApiError::MissingSceneUrl {
                    job_id: task.job.id.clone(),
                })?;

        let filename = self.filename_from_resource_url(scene_url, "jobs")?;
        if let Some(parent) = filename.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(scene_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&filename).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        debug!(task_id = %task.id, path = %filename.display(), "Scene staged");
        Ok(filename)
    }

    /// Upload every file in the task's output directory.
    pub async fn upload_outputs(&self, task: &Task) -> Result<Task, ApiError> {
        let output_dir = self.path_from_id(&task.id, "tasks");

        let mut form = reqwest::multipart::Form::new();
        let mut entries = tokio::fs::read_dir(&output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let bytes = tokio::fs::read(entry.path()).await?;
            form = form.part(
                "images",
                reqwest::multipart::Part::bytes(bytes).file_name(name),
            );
        }

        let response = self
            .client
            .post(self.url(&format!("tasks/{}/images", task.id)))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Cache location for an id under a prefix (`jobs/{id}`, `tasks/{id}`).
    fn path_from_id(&self, id: &str, prefix: &str) -> PathBuf {
        self.data_dir.join(prefix).join(id)
    }

    /// Cache location for a resource url: its last two segments are
    /// `{id}/{filename}`.
    fn filename_from_resource_url(&self, url: &str, prefix: &str) -> Result<PathBuf, ApiError> {
        let mut segments = url.rsplit('/');
        let (filename, id) = match (segments.next(), segments.next()) {
            (Some(filename), Some(id)) if !filename.is_empty() && !id.is_empty() => (filename, id),
            _ => return Err(ApiError::InvalidResourceUrl(url.to_string())),
        };

        Ok(self.data_dir.join(prefix).join(id).join(filename))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> JobApiClient {
        JobApiClient::new("api.farm.local", 443, "v1", true, "key", "/var/lib/farm").unwrap()
    }

    #[test]
    fn base_url_includes_protocol_and_version() {
        let client = client();
        assert_eq!(client.url("devices"), "https://api.farm.local:443/v1/devices");
    }

    #[test]
    fn job_events_url_switches_scheme() {
        let client = client();
        assert_eq!(
            client.job_events_url("job_1"),
            "wss://api.farm.local:443/v1/jobs/job_1/events"
        );
    }

    #[test]
    fn resource_urls_map_into_the_cache_layout() {
        let client = client();
        let path = client
            .filename_from_resource_url("https://api.farm.local/v1/jobs/job_1/scene.blend", "jobs")
            .unwrap();
        assert_eq!(path, PathBuf::from("/var/lib/farm/jobs/job_1/scene.blend"));
    }

    #[test]
    fn malformed_resource_urls_are_rejected() {
        let client = client();
        assert!(client.filename_from_resource_url("", "jobs").is_err());
        assert!(client.filename_from_resource_url("scene.blend", "jobs").is_err());
    }
}
