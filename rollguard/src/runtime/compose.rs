//! Docker Compose runtime
//!
//! Every instance is a compose project named after the instance. The
//! project's configuration lives in `<instances_dir>/<name>.env`, which the
//! compose file reads through `${IMAGE}`, `${HOST_PORT}`, `${CONTAINER_PORT}`
//! and `${DATA_DIR}`. Renaming an instance takes its project down, moves the
//! env file, and brings the project back up under the new name if it was
//! running before.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::instance::{InstanceSpec, InstanceStatus};
use crate::runtime::transport::{CommandSpec, Transport};
use crate::runtime::Runtime;

/// Which compose CLI is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComposeCli {
    /// `docker compose`
    Plugin,
    /// `docker-compose`
    Standalone,
}

/// Runtime backed by `docker compose`
#[derive(Debug)]
pub struct ComposeRuntime {
    transport: Transport,
    docker_bin: String,
    compose_file: PathBuf,
    instances_dir: PathBuf,
    cli: OnceCell<ComposeCli>,
}

impl ComposeRuntime {
    pub fn new(
        transport: Transport,
        docker_bin: impl Into<String>,
        compose_file: impl Into<PathBuf>,
        instances_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            docker_bin: docker_bin.into(),
            compose_file: compose_file.into(),
            instances_dir: instances_dir.into(),
            cli: OnceCell::new(),
        }
    }

    fn env_file(&self, name: &str) -> String {
        self.instances_dir
            .join(format!("{}.env", name))
            .to_string_lossy()
            .into_owned()
    }

    async fn detect_cli(&self) -> ComposeCli {
        let probe = CommandSpec::new(self.docker_bin.clone()).args(["compose", "version"]);
        match self.transport.exec(&probe).await {
            Ok(output) if output.success() => ComposeCli::Plugin,
            _ => {
                debug!("'docker compose' unavailable, falling back to docker-compose");
                ComposeCli::Standalone
            }
        }
    }

    async fn compose(&self, project: &str) -> CommandSpec {
        let cli = *self.cli.get_or_init(|| self.detect_cli()).await;
        let base = match cli {
            ComposeCli::Plugin => CommandSpec::new(self.docker_bin.clone()).arg("compose"),
            ComposeCli::Standalone => CommandSpec::new("docker-compose"),
        };
        base.arg("-p")
            .arg(project)
            .arg("-f")
            .arg(self.compose_file.to_string_lossy().into_owned())
            .arg("--env-file")
            .arg(self.env_file(project))
    }

    /// Env file contents for a spec
    pub fn render_env(spec: &InstanceSpec) -> String {
        let mut lines = vec![format!("IMAGE={}", spec.image)];
        if let Some(port) = spec.ports.first() {
            lines.push(format!("HOST_PORT={}", port.host));
            lines.push(format!("CONTAINER_PORT={}", port.container));
        }
        if let Some(volume) = spec.volumes.first() {
            lines.push(format!("DATA_DIR={}", volume.source));
        }
        for (key, value) in &spec.env {
            lines.push(format!("{}={}", key, value));
        }
        lines.join("\n") + "\n"
    }

    async fn up(&self, name: &str) -> Result<(), DeployError> {
        let cmd = self.compose(name).await.args(["up", "-d"]);
        self.transport.exec_ok(&cmd, DeployError::RuntimeError).await?;
        Ok(())
    }
}

#[async_trait]
impl Runtime for ComposeRuntime {
    async fn pull(&self, image: &str) -> Result<(), DeployError> {
        info!("Pulling image: {}", image);
        let cmd = CommandSpec::new(self.docker_bin.clone()).args(["pull", image]);
        self.transport.exec_ok(&cmd, DeployError::PullError).await?;
        Ok(())
    }

    async fn run(&self, spec: &InstanceSpec) -> Result<(), DeployError> {
        info!("Starting compose project {} from {}", spec.name, spec.image);

        let dir = self.instances_dir.to_string_lossy().into_owned();
        self.transport
            .exec_ok(&CommandSpec::new("mkdir").args(["-p", dir.as_str()]), DeployError::RuntimeError)
            .await?;
        let write = CommandSpec::new("tee")
            .arg(self.env_file(&spec.name))
            .stdin(Self::render_env(spec));
        self.transport.exec_ok(&write, DeployError::RuntimeError).await?;

        self.up(&spec.name).await
    }

    async fn start(&self, name: &str) -> Result<(), DeployError> {
        debug!("Starting compose project: {}", name);
        self.up(name).await
    }

    async fn stop(&self, name: &str) -> Result<(), DeployError> {
        if !self.exists(name).await? {
            debug!("Compose project {} does not exist, nothing to stop", name);
            return Ok(());
        }
        let cmd = self.compose(name).await.arg("stop");
        self.transport.exec_ok(&cmd, DeployError::RuntimeError).await?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), DeployError> {
        debug!("Renaming compose project {} -> {}", from, to);
        if self.exists(to).await? {
            return Err(DeployError::RuntimeError(format!(
                "Cannot rename {} to {}: target already exists",
                from, to
            )));
        }

        let was_running = self.status(from).await? == InstanceStatus::Running;

        let down = self.compose(from).await.arg("down");
        self.transport.exec_ok(&down, DeployError::RuntimeError).await?;

        let mv = CommandSpec::new("mv").args([self.env_file(from), self.env_file(to)]);
        self.transport.exec_ok(&mv, DeployError::RuntimeError).await?;

        if was_running {
            self.up(to).await?;
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), DeployError> {
        if !self.exists(name).await? {
            debug!("Compose project {} does not exist, nothing to remove", name);
            return Ok(());
        }
        let down = self.compose(name).await.args(["down", "--remove-orphans"]);
        self.transport.exec_ok(&down, DeployError::RuntimeError).await?;

        let rm = CommandSpec::new("rm").args(["-f".to_string(), self.env_file(name)]);
        self.transport.exec_ok(&rm, DeployError::RuntimeError).await?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, DeployError> {
        let test = CommandSpec::new("test").args(["-f".to_string(), self.env_file(name)]);
        let output = self.transport.exec(&test).await?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(DeployError::RuntimeError(format!(
                "Unable to check compose project {}: {}",
                name,
                output.diagnostic()
            ))),
        }
    }

    async fn status(&self, name: &str) -> Result<InstanceStatus, DeployError> {
        if !self.exists(name).await? {
            return Ok(InstanceStatus::Missing);
        }
        let ps = self
            .compose(name)
            .await
            .args(["ps", "--status", "running", "-q"]);
        let output = self.transport.exec_ok(&ps, DeployError::RuntimeError).await?;
        if output.stdout.trim().is_empty() {
            Ok(InstanceStatus::Exited)
        } else {
            Ok(InstanceStatus::Running)
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String, DeployError> {
        let cmd = self
            .compose(name)
            .await
            .args(["logs", "--no-color", "--tail"])
            .arg(tail.to_string());
        let output = self.transport.exec_ok(&cmd, DeployError::RuntimeError).await?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn prune_images(&self) -> Result<(), DeployError> {
        info!("Pruning dangling images");
        let cmd = CommandSpec::new(self.docker_bin.clone()).args(["image", "prune", "-f"]);
        self.transport.exec_ok(&cmd, DeployError::RuntimeError).await?;
        Ok(())
    }
}
