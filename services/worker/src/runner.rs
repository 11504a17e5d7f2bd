//! The supervised task-processing loop.
//!
//! Claims queued tasks for this worker's container class, stages job assets,
//! renders, uploads outputs and confirms the state transition. The render
//! and upload run inside an atomic section so an operator-requested shutdown
//! never tears down a task mid-upload. While a task is active, a job event
//! subscription observes the owning job and logs its transitions.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use farm_lifecycle::LifecycleExecutor;
use farm_types::{Task, TaskState};

use crate::cache::RenderCache;
use crate::client::JobApiClient;
use crate::stream::JobEventChannel;

pub struct TaskRunner {
    client: Arc<JobApiClient>,
    cache: Arc<RenderCache>,
    executor: LifecycleExecutor,
    container_name: String,
    poll_interval: Duration,
    close_timeout: Duration,
}

impl TaskRunner {
    pub fn new(
        client: Arc<JobApiClient>,
        cache: Arc<RenderCache>,
        executor: LifecycleExecutor,
        container_name: String,
        poll_interval: Duration,
        close_timeout: Duration,
    ) -> Self {
        Self {
            client,
            cache,
            executor,
            container_name,
            poll_interval,
            close_timeout,
        }
    }

    /// Poll for work until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            container_name = %self.container_name,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Starting task loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                claimed = self.client.poll_task(&self.container_name) => {
                    match claimed {
                        Ok(Some(task)) => self.process(task).await,
                        Ok(None) => self.idle(&mut shutdown).await,
                        Err(claim_error) => {
                            warn!(error = %claim_error, "Task claim failed");
                            self.idle(&mut shutdown).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Task loop shutting down");
    }

    async fn idle(&self, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    /// Run one claimed task to completion or failure.
    async fn process(&self, task: Task) {
        info!(task_id = %task.id, job_id = %task.job.id, "Task claimed");

        // Observe the owning job for the lifetime of the task.
        let (watch_tx, watch_rx) = watch::channel(false);
        let channel = JobEventChannel::new(
            self.client.job_events_url(&task.job.id),
            self.close_timeout,
        );
        let job_id = task.job.id.clone();
        let watcher = tokio::spawn(async move {
            let ended = channel
                .listen(watch_rx, |job| {
                    info!(job_id = %job.id, state = %job.state, "Job state update");
                })
                .await;

            if let Err(subscription_error) = ended {
                debug!(
                    job_id = %job_id,
                    error = %subscription_error,
                    "Job event subscription ended"
                );
            }
        });

        match self.execute(&task).await {
            Ok(()) => info!(task_id = %task.id, "Task completed"),
            Err(task_error) => {
                error!(task_id = %task.id, error = %task_error, "Task failed");

                if let Err(state_error) = self
                    .client
                    .update_task_state(&task, TaskState::Failed)
                    .await
                {
                    warn!(
                        task_id = %task.id,
                        error = %state_error,
                        "Failed to mark task failed"
                    );
                }
            }
        }

        if let Err(cache_error) = self.cache.delete_cache(&task) {
            warn!(task_id = %task.id, error = %cache_error, "Cache cleanup failed");
        }

        let _ = watch_tx.send(true);
        let _ = watcher.await;
    }

    async fn execute(&self, task: &Task) -> Result<()> {
        let confirmed = self
            .client
            .update_task_state(task, TaskState::Running)
            .await
            .context("failed to request running transition")?;
        if !confirmed {
            bail!("backend did not confirm task {} running", task.id);
        }

        if self.cache.has_cache(task) {
            debug!(job_id = %task.job.id, "Scene already staged");
        } else {
            self.client
                .download_scene(task)
                .await
                .context("failed to stage scene")?;
        }

        // Render and upload are non-interruptible: a signal arriving here is
        // honored only after the upload and state transition land.
        self.executor.begin_atomic();
        let outcome = self.render_and_upload(task).await;
        self.executor.end_atomic();

        outcome
    }

    async fn render_and_upload(&self, task: &Task) -> Result<()> {
        self.cache.render(task).await.context("render failed")?;

        self.client
            .upload_outputs(task)
            .await
            .context("failed to upload outputs")?;

        let confirmed = self
            .client
            .update_task_state(task, TaskState::Completed)
            .await
            .context("failed to request completed transition")?;
        if !confirmed {
            bail!("backend did not confirm task {} completed", task.id);
        }

        Ok(())
    }
}
