//! Worker VM provisioning through the `docker-machine` CLI.
//!
//! The machine layer treats the provisioning tool as an opaque external
//! process: every operation shells out, checks the exit status and parses
//! the tool's output into typed values. A VM whose inspected resources
//! diverge from the requested ones is recreated, not mutated; the tool has
//! no in-place resize.

use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from the machine provisioning tool.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("failed to run docker-machine: {0}")]
    Io(#[from] std::io::Error),

    #[error("docker-machine {command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("unparseable docker-machine output: {0}")]
    Parse(String),
}

/// One row of `docker-machine ls`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSummary {
    pub name: String,
    pub active: String,
    pub driver: String,
    pub state: String,
    pub url: String,
}

/// Requested VM resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineResources {
    pub cpus: u32,
    /// Memory in megabytes.
    pub memory: u64,
    /// Disk size in megabytes.
    pub storage: u64,
}

/// Typed `docker-machine inspect` output, reduced to what we act on.
#[derive(Debug, Deserialize)]
pub struct MachineInspect {
    #[serde(rename = "Driver")]
    pub driver: DriverConfig,
}

#[derive(Debug, Deserialize)]
pub struct DriverConfig {
    #[serde(rename = "CPU")]
    pub cpus: u32,
    #[serde(rename = "Memory")]
    pub memory: u64,
    #[serde(rename = "DiskSize")]
    pub disk_size: u64,
}

impl MachineInspect {
    fn resources(&self) -> MachineResources {
        MachineResources {
            cpus: self.driver.cpus,
            memory: self.driver.memory,
            storage: self.driver.disk_size,
        }
    }
}

/// A named VM managed through the provisioning tool.
pub struct Machine {
    name: String,
    storage_path: PathBuf,
}

impl Machine {
    pub fn new(name: impl Into<String>, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            storage_path: storage_path.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, args: &[&str]) -> Result<String, MachineError> {
        let executable = self.storage_path.join("bin/docker-machine");

        let output = Command::new("sudo")
            .arg(&executable)
            .arg("--storage-path")
            .arg(&self.storage_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(MachineError::CommandFailed {
                command: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// All machines known to the tool.
    pub async fn list_machines(&self) -> Result<Vec<MachineSummary>, MachineError> {
        let output = self.run(&["ls"]).await?;
        parse_machine_list(&output)
    }

    pub async fn exists(&self) -> Result<bool, MachineError> {
        let machines = self.list_machines().await?;
        Ok(machines.iter().any(|machine| machine.name == self.name))
    }

    pub async fn running(&self) -> Result<bool, MachineError> {
        let machines = self.list_machines().await?;
        Ok(machines
            .iter()
            .find(|machine| machine.name == self.name)
            .is_some_and(|machine| machine.state == "running"))
    }

    /// Whether the VM's engine is a member of any swarm.
    pub async fn attached(&self) -> Result<bool, MachineError> {
        let output = self
            .run(&[
                "ssh",
                &self.name,
                "docker",
                "info",
                "--format",
                "{{.Swarm.LocalNodeState}}",
            ])
            .await?;

        Ok(output.trim() != "inactive")
    }

    pub async fn create(&self, resources: MachineResources) -> Result<(), MachineError> {
        info!(machine = %self.name, ?resources, "Creating machine");

        let cpus = resources.cpus.to_string();
        let memory = resources.memory.to_string();
        let storage = resources.storage.to_string();

        self.run(&[
            "create",
            "--driver",
            "virtualbox",
            "--virtualbox-cpu-count",
            &cpus,
            "--virtualbox-memory",
            &memory,
            "--virtualbox-disk-size",
            &storage,
            &self.name,
        ])
        .await?;

        Ok(())
    }

    pub async fn start(&self) -> Result<(), MachineError> {
        self.run(&["start", &self.name]).await?;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), MachineError> {
        self.run(&["stop", &self.name]).await?;
        Ok(())
    }

    pub async fn remove(&self) -> Result<(), MachineError> {
        self.run(&["rm", &self.name]).await?;
        Ok(())
    }

    pub async fn inspect(&self) -> Result<MachineInspect, MachineError> {
        let output = self.run(&["inspect", &self.name]).await?;
        serde_json::from_str(&output).map_err(|e| MachineError::Parse(e.to_string()))
    }

    /// Converge the VM to `resources` and make sure it is running.
    ///
    /// Recreates the VM when the inspected resources differ from the
    /// requested ones (or unconditionally with `force`).
    pub async fn update(
        &self,
        resources: MachineResources,
        force: bool,
    ) -> Result<(), MachineError> {
        let recreate = force || self.inspect().await?.resources() != resources;

        if recreate {
            debug!(machine = %self.name, "Recreating machine");
            if self.running().await? {
                self.stop().await?;
            }
            self.remove().await?;
            self.create(resources).await?;
        }

        if !self.running().await? {
            self.start().await?;
        }

        Ok(())
    }

    /// Join the cluster from inside the VM.
    pub async fn join_cluster(
        &self,
        cluster_address: &str,
        token: &str,
    ) -> Result<(), MachineError> {
        info!(machine = %self.name, cluster_address, "Joining cluster");

        self.run(&[
            "ssh",
            &self.name,
            "docker",
            "swarm",
            "join",
            "--token",
            token,
            cluster_address,
        ])
        .await?;

        Ok(())
    }

    /// Leave the cluster from inside the VM.
    pub async fn leave_cluster(&self) -> Result<(), MachineError> {
        self.run(&["ssh", &self.name, "docker", "swarm", "leave"])
            .await?;
        Ok(())
    }
}

/// Parse the tool's `ls` table: NAME, ACTIVE, DRIVER, STATE, URL columns,
/// values lowercased for uniform comparisons.
fn parse_machine_list(output: &str) -> Result<Vec<MachineSummary>, MachineError> {
    let mut lines = output.trim().lines();

    let header = lines
        .next()
        .ok_or_else(|| MachineError::Parse("empty ls output".to_string()))?;
    if !header.to_lowercase().starts_with("name") {
        return Err(MachineError::Parse(format!("unexpected header: {header}")));
    }

    let machines = lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line
                .split_whitespace()
                .take(5)
                .map(|field| field.to_lowercase());

            MachineSummary {
                name: fields.next().unwrap_or_default(),
                active: fields.next().unwrap_or_default(),
                driver: fields.next().unwrap_or_default(),
                state: fields.next().unwrap_or_default(),
                url: fields.next().unwrap_or_default(),
            }
        })
        .collect();

    Ok(machines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LS_OUTPUT: &str = "\
NAME       ACTIVE   DRIVER       STATE     URL                         SWARM   DOCKER
worker-1   -        virtualbox   Running   tcp://192.168.99.100:2376           v24.0.2
worker-2   -        virtualbox   Stopped                                       Unknown
";

    #[test]
    fn parses_ls_table() {
        let machines = parse_machine_list(LS_OUTPUT).unwrap();

        assert_eq!(machines.len(), 2);
        assert_eq!(machines[0].name, "worker-1");
        assert_eq!(machines[0].state, "running");
        assert_eq!(machines[0].url, "tcp://192.168.99.100:2376");
        assert_eq!(machines[1].state, "stopped");
    }

    #[test]
    fn rejects_unexpected_ls_output() {
        assert!(parse_machine_list("").is_err());
        assert!(parse_machine_list("garbage output\nrow").is_err());
    }

    #[test]
    fn inspect_resources_round_trip() {
        let json = r#"{
            "Driver": {"CPU": 2, "Memory": 4096, "DiskSize": 20000, "MachineName": "worker-1"}
        }"#;

        let inspect: MachineInspect = serde_json::from_str(json).unwrap();
        assert_eq!(
            inspect.resources(),
            MachineResources {
                cpus: 2,
                memory: 4096,
                storage: 20000
            }
        );
    }
}
