//! Deployment metadata files
//!
//! `current-version.txt` and `last-deployment.txt` are written for operators
//! and tooling. The orchestrator writes them but never reads them back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::errors::DeployError;
use crate::models::deployment::DeploymentMetadata;
use crate::runtime::transport::{CommandSpec, Transport};
use crate::storage::layout::DeployLayout;

/// Sink for the metadata recorded on commit
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Overwrite both metadata files, each atomically
    async fn record(&self, metadata: &DeploymentMetadata) -> Result<(), DeployError>;
}

/// Metadata files on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalMetadata {
    layout: DeployLayout,
}

impl LocalMetadata {
    pub fn new(layout: DeployLayout) -> Self {
        Self { layout }
    }

    /// Read the metadata back, `None` when nothing was deployed yet
    pub async fn load(&self) -> Result<Option<DeploymentMetadata>, DeployError> {
        let version_file = self.layout.current_version_file();
        let time_file = self.layout.last_deployment_file();
        if !version_file.exists().await || !time_file.exists().await {
            return Ok(None);
        }

        let version = version_file.read_string().await?.trim().to_string();
        let raw_time = time_file.read_string().await?;
        let deployed_at = DateTime::parse_from_rfc3339(raw_time.trim())
            .map_err(|e| {
                DeployError::ValidationError(format!(
                    "Invalid timestamp in {}: {}",
                    time_file.path().display(),
                    e
                ))
            })?
            .with_timezone(&Utc);

        Ok(Some(DeploymentMetadata { version, deployed_at }))
    }
}

#[async_trait]
impl MetadataStore for LocalMetadata {
    async fn record(&self, metadata: &DeploymentMetadata) -> Result<(), DeployError> {
        self.layout
            .current_version_file()
            .write_atomic(format!("{}\n", metadata.version).as_bytes())
            .await?;
        self.layout
            .last_deployment_file()
            .write_atomic(format!("{}\n", metadata.deployed_at_string()).as_bytes())
            .await?;
        debug!("Recorded deployment metadata: {:?}", metadata);
        Ok(())
    }
}

/// Metadata files on the transport's host
#[derive(Debug, Clone)]
pub struct RemoteMetadata {
    transport: Transport,
    layout: DeployLayout,
}

impl RemoteMetadata {
    pub fn new(transport: Transport, layout: DeployLayout) -> Self {
        Self { transport, layout }
    }

    async fn write_atomic(&self, path: String, contents: String) -> Result<(), DeployError> {
        let temp = format!("{}.tmp", path);
        self.transport
            .exec_ok(
                &CommandSpec::new("tee").arg(temp.clone()).stdin(contents),
                DeployError::StorageError,
            )
            .await?;
        self.transport
            .exec_ok(
                &CommandSpec::new("mv").args(["-f".to_string(), temp, path]),
                DeployError::StorageError,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for RemoteMetadata {
    async fn record(&self, metadata: &DeploymentMetadata) -> Result<(), DeployError> {
        let base = self.layout.base_dir().display().to_string();
        self.transport
            .exec_ok(&CommandSpec::new("mkdir").args(["-p", base.as_str()]), DeployError::StorageError)
            .await?;

        self.write_atomic(
            self.layout.current_version_file().path().display().to_string(),
            format!("{}\n", metadata.version),
        )
        .await?;
        self.write_atomic(
            self.layout.last_deployment_file().path().display().to_string(),
            format!("{}\n", metadata.deployed_at_string()),
        )
        .await?;
        debug!("Recorded deployment metadata: {:?}", metadata);
        Ok(())
    }
}
