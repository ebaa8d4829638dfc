//! Docker CLI runtime

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::instance::{InstanceSpec, InstanceStatus};
use crate::runtime::transport::{CommandSpec, Transport};
use crate::runtime::Runtime;

/// Runtime backed by the `docker` CLI, locally or over ssh
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    transport: Transport,
    docker_bin: String,
}

impl DockerRuntime {
    pub fn new(transport: Transport, docker_bin: impl Into<String>) -> Self {
        Self {
            transport,
            docker_bin: docker_bin.into(),
        }
    }

    fn docker(&self) -> CommandSpec {
        CommandSpec::new(self.docker_bin.clone())
    }

    /// `docker run` arguments for a spec
    pub fn run_command(&self, spec: &InstanceSpec) -> CommandSpec {
        let mut cmd = self
            .docker()
            .args(["run", "-d", "--name"])
            .arg(spec.name.clone())
            .args(["--restart", "unless-stopped"]);

        for port in &spec.ports {
            cmd = cmd.arg("-p").arg(port.to_string());
        }
        for volume in &spec.volumes {
            cmd = cmd.arg("-v").arg(volume.to_string());
        }
        for (key, value) in &spec.env {
            cmd = cmd.arg("-e").arg(format!("{}={}", key, value));
        }

        cmd.arg(spec.image.clone())
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn pull(&self, image: &str) -> Result<(), DeployError> {
        info!("Pulling image: {}", image);
        self.transport
            .exec_ok(&self.docker().args(["pull", image]), DeployError::PullError)
            .await?;
        Ok(())
    }

    async fn run(&self, spec: &InstanceSpec) -> Result<(), DeployError> {
        info!("Starting instance {} from {}", spec.name, spec.image);
        self.transport
            .exec_ok(&self.run_command(spec), DeployError::RuntimeError)
            .await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), DeployError> {
        debug!("Starting existing instance: {}", name);
        self.transport
            .exec_ok(&self.docker().args(["start", name]), DeployError::RuntimeError)
            .await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), DeployError> {
        if !self.exists(name).await? {
            debug!("Instance {} does not exist, nothing to stop", name);
            return Ok(());
        }
        debug!("Stopping instance: {}", name);
        self.transport
            .exec_ok(&self.docker().args(["stop", name]), DeployError::RuntimeError)
            .await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DeployError> {
        debug!("Renaming instance {} -> {}", from, to);
        self.transport
            .exec_ok(&self.docker().args(["rename", from, to]), DeployError::RuntimeError)
            .await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), DeployError> {
        if !self.exists(name).await? {
            debug!("Instance {} does not exist, nothing to remove", name);
            return Ok(());
        }
        debug!("Removing instance: {}", name);
        self.transport
            .exec_ok(&self.docker().args(["rm", "-f", name]), DeployError::RuntimeError)
            .await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, DeployError> {
        let output = self
            .transport
            .exec_ok(
                &self.docker().args(["ps", "-a", "--format", "{{.Names}}"]),
                DeployError::RuntimeError,
            )
            .await?;
        Ok(output.stdout.lines().any(|line| line.trim() == name))
    }

    async fn status(&self, name: &str) -> Result<InstanceStatus, DeployError> {
        if !self.exists(name).await? {
            return Ok(InstanceStatus::Missing);
        }
        let output = self
            .transport
            .exec_ok(
                &self.docker().args(["inspect", "-f", "{{.State.Status}}", name]),
                DeployError::RuntimeError,
            )
            .await?;
        Ok(InstanceStatus::parse(&output.stdout))
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, DeployError> {
        let tail = tail.to_string();
        let output = self
            .transport
            .exec_ok(
                &self.docker().args(["logs", "--tail", tail.as_str(), name]),
                DeployError::RuntimeError,
            )
            .await?;
        // docker logs replays the container's stderr on stderr
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn prune_images(&self) -> Result<(), DeployError> {
        info!("Pruning dangling images");
        self.transport
            .exec_ok(&self.docker().args(["image", "prune", "-f"]), DeployError::RuntimeError)
            .await?;
        Ok(())
    }
}
