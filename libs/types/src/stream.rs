//! Job event stream wire envelope.
//!
//! A single duplex stream carries two disjoint message shapes: heartbeat
//! control frames and job-state pushes. Each frame is tagged with an explicit
//! discriminant so receivers never have to probe payload shapes.

use serde::{Deserialize, Serialize};

use crate::Job;

/// Heartbeat message exchanged on the job event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFrame {
    Ping,
    Pong,
}

/// A frame on the job event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StreamFrame {
    /// Liveness sub-protocol; a `ping` must be answered with a `pong`.
    Control(ControlFrame),
    /// A job lifecycle update pushed to subscribers.
    JobState(Job),
}
