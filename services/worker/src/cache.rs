//! Disk-resident render asset cache.
//!
//! Job assets (scenes) are large and shared by every task of a job, so they
//! are staged once under a job-scoped directory and reused. Task outputs are
//! transient per-task working state and are always reclaimed after the task
//! completes. Eviction is coarse: when the jobs root's filesystem usage
//! exceeds the configured cache factor, the entire jobs cache is purged:
//! bounded worst-case disk usage traded against cache hit rate.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use farm_types::Task;

/// Cache and render errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no scene staged for job {job_id}")]
    MissingScene { job_id: String },

    #[error("render process exited with status {status}")]
    RenderFailed { status: i32 },
}

/// Stages job assets and task outputs under a data directory.
pub struct RenderCache {
    /// Render command with `{scene_path}`, `{sequence_path}`,
    /// `{frame_start}`, `{frame_end}` placeholders.
    command_template: String,
    data_dir: PathBuf,
    /// Filesystem usage percentage above which the jobs cache is purged.
    cache_factor: f64,
}

impl RenderCache {
    pub fn new(
        command_template: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        cache_factor: f64,
    ) -> Self {
        Self {
            command_template: command_template.into(),
            data_dir: data_dir.into(),
            cache_factor,
        }
    }

    /// Job-scoped cache directory (`jobs/{job_id}`).
    pub fn job_path(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("jobs").join(job_id)
    }

    /// Task-scoped output directory (`tasks/{task_id}`).
    pub fn task_path(&self, task_id: &str) -> PathBuf {
        self.data_dir.join("tasks").join(task_id)
    }

    fn jobs_root(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// Whether the task's job has assets staged.
    pub fn has_cache(&self, task: &Task) -> bool {
        let path = self.job_path(&task.job.id);

        match std::fs::read_dir(&path) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }

    /// Run the configured render command over the task's frame range.
    ///
    /// The single staged scene file is substituted into the template along
    /// with the task-scoped sequence directory; a non-zero exit from the
    /// render process is fatal for the task.
    pub async fn render(&self, task: &Task) -> Result<(), CacheError> {
        let scene_path = self.staged_scene(&task.job.id)?;

        let sequence_dir = self.task_path(&task.id);
        std::fs::create_dir_all(&sequence_dir)?;

        let mut sequence_path = sequence_dir.to_string_lossy().into_owned();
        sequence_path.push('/');

        let command = self
            .command_template
            .replace("{scene_path}", &scene_path.to_string_lossy())
            .replace("{sequence_path}", &sequence_path)
            .replace("{frame_start}", &task.frame_range.start.to_string())
            .replace("{frame_end}", &task.frame_range.end.to_string());

        info!(task_id = %task.id, command = %command, "Starting render");

        let status = Command::new("sh").arg("-c").arg(&command).status().await?;

        if !status.success() {
            return Err(CacheError::RenderFailed {
                status: status.code().unwrap_or(-1),
            });
        }

        Ok(())
    }

    /// Reclaim the task's output directory; evict the whole jobs cache when
    /// disk usage is over the threshold.
    ///
    /// The task directory is always removed; it is per-task working state,
    /// never reused. The job cache is only purged globally, and only under
    /// disk pressure.
    pub fn delete_cache(&self, task: &Task) -> Result<(), CacheError> {
        let task_path = self.task_path(&task.id);
        if task_path.is_dir() {
            std::fs::remove_dir_all(&task_path)?;
            debug!(task_id = %task.id, "Task output reclaimed");
        }

        let jobs_root = self.jobs_root();
        if jobs_root.is_dir() {
            match disk_usage_percent(&jobs_root) {
                Ok(usage) if usage > self.cache_factor => {
                    info!(
                        usage_percent = usage,
                        cache_factor = self.cache_factor,
                        "Disk usage over threshold, purging jobs cache"
                    );
                    std::fs::remove_dir_all(&jobs_root)?;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(error = %error, "Failed to measure disk usage, keeping cache");
                }
            }
        }

        Ok(())
    }

    /// The single scene file staged under the job directory.
    fn staged_scene(&self, job_id: &str) -> Result<PathBuf, CacheError> {
        let job_path = self.job_path(job_id);

        std::fs::read_dir(&job_path)
            .ok()
            .and_then(|mut entries| entries.next())
            .and_then(|entry| entry.ok())
            .map(|entry| entry.path())
            .ok_or_else(|| CacheError::MissingScene {
                job_id: job_id.to_string(),
            })
    }
}

/// Filesystem usage percentage for the filesystem containing `path`.
#[cfg(unix)]
fn disk_usage_percent(path: &Path) -> std::io::Result<f64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut stats = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stats.as_mut_ptr()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let stats = unsafe { stats.assume_init() };
    if stats.f_blocks == 0 {
        return Ok(0.0);
    }

    let used = stats.f_blocks.saturating_sub(stats.f_bavail);
    Ok(used as f64 / stats.f_blocks as f64 * 100.0)
}

#[cfg(not(unix))]
fn disk_usage_percent(_path: &Path) -> std::io::Result<f64> {
    Ok(0.0)
}
