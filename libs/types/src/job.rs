//! Render job types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle state.
///
/// Jobs are mutated only through explicit state-transition requests against
/// the backend; workers never write job state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Inclusive interval of animation frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: i64,
    pub end: i64,
}

impl FrameRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Number of frames in the range, both endpoints included.
    pub fn frame_count(&self) -> i64 {
        self.end - self.start + 1
    }
}

/// A render job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub frame_range: FrameRange,
    /// Maximum number of workers rendering this job concurrently.
    pub parallelism: u32,
    /// Service class that executes this job.
    pub container_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_is_inclusive() {
        assert_eq!(FrameRange::new(1, 10).frame_count(), 10);
        assert_eq!(FrameRange::new(5, 5).frame_count(), 1);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn job_round_trips_without_optional_urls() {
        let json = r#"{
            "id": "job_1",
            "state": "queued",
            "frame_range": {"start": 1, "end": 240},
            "parallelism": 4,
            "container_name": "blender",
            "created_at": "2026-01-10T08:30:00Z",
            "updated_at": "2026-01-10T08:30:00Z"
        }"#;

        let job: Job = serde_json::from_str(json).unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert!(job.scene_url.is_none());

        let out = serde_json::to_string(&job).unwrap();
        assert!(!out.contains("scene_url"));
    }
}
