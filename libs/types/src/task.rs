//! Render task types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FrameRange, Job};

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of work bound to exactly one job.
///
/// The embedded [`Job`] is a read snapshot taken when the task was claimed;
/// workers hold it alongside local cache artifacts keyed by task/job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub job: Job,
    pub frame_range: FrameRange,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
}
