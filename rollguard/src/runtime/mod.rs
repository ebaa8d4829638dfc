//! Container runtime capability

pub mod compose;
pub mod docker;
pub mod transport;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::models::instance::{InstanceSpec, InstanceStatus};

/// Operations the orchestrator needs from a container runtime.
///
/// `stop` and `remove` on an instance that does not exist succeed without
/// doing anything, so teardown can always be repeated.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Fetch an image. Failure aborts a deployment before anything changes.
    async fn pull(&self, image: &str) -> Result<(), DeployError>;

    /// Create and start a new instance
    async fn run(&self, spec: &InstanceSpec) -> Result<(), DeployError>;

    /// Start an existing, stopped instance
    async fn start(&self, name: &str) -> Result<(), DeployError>;

    async fn stop(&self, name: &str) -> Result<(), DeployError>;

    /// Move an instance to a new name. A running instance is running again
    /// under `to` when this returns; a stopped one stays stopped.
    async fn rename(&self, from: &str, to: &str) -> Result<(), DeployError>;

    async fn remove(&self, name: &str) -> Result<(), DeployError>;

    async fn exists(&self, name: &str) -> Result<bool, DeployError>;

    async fn status(&self, name: &str) -> Result<InstanceStatus, DeployError>;

    /// Last `tail` lines of the instance's output, for diagnostics
    async fn logs(&self, name: &str, tail: usize) -> Result<String, DeployError>;

    /// Remove dangling images
    async fn prune_images(&self) -> Result<(), DeployError>;
}
