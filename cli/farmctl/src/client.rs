//! HTTP client for the backend job API.

use std::path::Path;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use thiserror::Error;

use farm_types::{FrameRange, Job};

/// CLI-facing API errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct JobCreateRequest<'a> {
    frame_range: FrameRange,
    parallelism: u32,
    container_name: &'a str,
}

/// API client for the backend job API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(api_url: &str, access_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(access_key).context("invalid access key")?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<Job, CliError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(CliError::Api {
            status: status.as_u16(),
            body,
        })
    }

    pub async fn create_job(
        &self,
        frame_range: FrameRange,
        parallelism: u32,
        container_name: &str,
    ) -> Result<Job, CliError> {
        let request = JobCreateRequest {
            frame_range,
            parallelism,
            container_name,
        };

        let response = self
            .client
            .post(self.url("jobs"))
            .json(&request)
            .send()
            .await?;
        Self::check(response).await
    }

    /// Upload the scene asset for a job.
    pub async fn upload_scene(&self, job_id: &str, scene: &Path) -> Result<Job> {
        let filename = scene
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("scene path has no filename")?;
        let bytes = tokio::fs::read(scene)
            .await
            .with_context(|| format!("failed to read {}", scene.display()))?;

        let form = reqwest::multipart::Form::new().part(
            "scene",
            reqwest::multipart::Part::bytes(bytes).file_name(filename),
        );

        let response = self
            .client
            .post(self.url(&format!("jobs/{job_id}/scene")))
            .multipart(form)
            .send()
            .await
            .map_err(CliError::Network)?;
        Ok(Self::check(response).await?)
    }

    /// Transition a job via an action verb (e.g. `start`).
    pub async fn transition_job(&self, job_id: &str, action: &str) -> Result<Job, CliError> {
        let response = self
            .client
            .post(self.url(&format!("jobs/{job_id}/actions/{action}")))
            .send()
            .await?;
        Self::check(response).await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, CliError> {
        let response = self.client.get(self.url(&format!("jobs/{job_id}"))).send().await?;
        Self::check(response).await
    }
}
