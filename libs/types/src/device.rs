//! Device registration types.
//!
//! A device is a cluster node registration owned by the backend store. It is
//! created once when a node registers and is immutable afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Manager,
    Worker,
}

impl NodeType {
    /// The role name as the orchestration engine spells it in join-token maps.
    pub fn role_name(&self) -> &'static str {
        match self {
            NodeType::Manager => "Manager",
            NodeType::Worker => "Worker",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Manager => write!(f, "manager"),
            NodeType::Worker => write!(f, "worker"),
        }
    }
}

/// A registered cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub node_type: NodeType,
    pub joined_at: DateTime<Utc>,
}

/// Registration request sent by a node that wants to join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub node_type: NodeType,
}

/// Registration response from the backend.
///
/// Carries the cluster address and the role-matched join token the node needs
/// to enter the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub node_type: NodeType,
    pub cluster_address: String,
    pub token: String,
    pub joined_at: DateTime<Utc>,
}
