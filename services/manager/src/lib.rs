//! Render-farm manager library.
//!
//! - **ClusterController**: swarm bootstrap and cluster-level resource
//!   convergence (secrets, services, join tokens)
//! - **Autoscaler**: replica-count reconciliation against task demand
//! - **NodeReaper**: removal of nodes the engine reports as down
//! - **Machine**: worker VM provisioning through an external CLI tool

pub mod autoscaler;
pub mod cluster;
pub mod config;
pub mod machine;
pub mod reaper;
pub mod swarm;
