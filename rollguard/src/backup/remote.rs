//! Backups on a remote host, driven over the transport with coreutils

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backup::{backup_name, parse_backup_name, BackupHandle, BackupManager, BackupStamp, Snapshot};
use crate::errors::DeployError;
use crate::runtime::transport::{CommandSpec, Transport};
use crate::storage::layout::DeployLayout;

/// Backups kept next to a data file on the transport's host
#[derive(Debug, Clone)]
pub struct RemoteBackups {
    transport: Transport,
    layout: DeployLayout,
}

impl RemoteBackups {
    pub fn new(transport: Transport, layout: DeployLayout) -> Self {
        Self { transport, layout }
    }

    fn data_dir(&self) -> String {
        self.layout.data_dir().path().display().to_string()
    }

    fn data_file(&self) -> String {
        self.layout.data_file().path().display().to_string()
    }

    fn backup_path(&self, stamp: &BackupStamp) -> String {
        self.layout
            .data_dir()
            .file(&backup_name(&self.layout.data_file_name, stamp))
            .path()
            .display()
            .to_string()
    }

    async fn file_exists(&self, path: &str) -> Result<bool, DeployError> {
        let output = self
            .transport
            .exec(&CommandSpec::new("test").args(["-f", path]))
            .await?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(DeployError::BackupError(format!(
                "Unable to check {}: {}",
                path,
                output.diagnostic()
            ))),
        }
    }

    async fn sha256(&self, path: &str) -> Result<String, DeployError> {
        let output = self
            .transport
            .exec_ok(&CommandSpec::new("sha256sum").arg(path), DeployError::BackupError)
            .await?;
        output
            .stdout
            .split_whitespace()
            .next()
            .map(str::to_string)
            .ok_or_else(|| DeployError::BackupError(format!("No checksum output for {}", path)))
    }

    /// `cp` to a temporary sibling, then `mv` into place
    async fn copy_atomic(&self, from: &str, to: &str) -> Result<(), DeployError> {
        let temp = format!("{}.tmp", to);
        self.transport
            .exec_ok(
                &CommandSpec::new("cp").args(["-p", from, temp.as_str()]),
                DeployError::BackupError,
            )
            .await?;
        self.transport
            .exec_ok(
                &CommandSpec::new("mv").args(["-f", temp.as_str(), to]),
                DeployError::BackupError,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BackupManager for RemoteBackups {
    fn location(&self) -> String {
        self.data_dir()
    }

    async fn snapshot(&self) -> Result<Snapshot, DeployError> {
        let source = self.data_file();
        if !self.file_exists(&source).await? {
            info!("No data file at {}, skipping backup (first deployment)", source);
            return Ok(Snapshot::Skipped);
        }

        let stamp = BackupStamp::now();
        let target = self.backup_path(&stamp);
        if self.file_exists(&target).await? {
            return Err(DeployError::BackupError(format!("Backup {} already exists", target)));
        }

        self.copy_atomic(&source, &target).await?;

        let expected = self.sha256(&source).await?;
        let actual = self.sha256(&target).await?;
        if expected != actual {
            let _ = self
                .transport
                .exec(&CommandSpec::new("rm").args(["-f", target.as_str()]))
                .await;
            return Err(DeployError::BackupError(format!(
                "Checksum mismatch for {} (expected {}, got {})",
                target, expected, actual
            )));
        }

        info!("Backup created: {}", target);
        Ok(Snapshot::Taken(BackupHandle {
            name: backup_name(&self.layout.data_file_name, &stamp),
            path: target,
            stamp,
        }))
    }

    async fn list(&self) -> Result<Vec<BackupHandle>, DeployError> {
        let dir = self.data_dir();
        let probe = self
            .transport
            .exec(&CommandSpec::new("test").args(["-d", dir.as_str()]))
            .await?;
        if !probe.success() {
            return Ok(Vec::new());
        }

        let output = self
            .transport
            .exec_ok(&CommandSpec::new("ls").args(["-1", dir.as_str()]), DeployError::BackupError)
            .await?;

        let mut backups: Vec<BackupHandle> = output
            .stdout
            .lines()
            .filter_map(|name| {
                let name = name.trim();
                parse_backup_name(&self.layout.data_file_name, name).map(|stamp| BackupHandle {
                    name: name.to_string(),
                    path: self.backup_path(&stamp),
                    stamp,
                })
            })
            .collect();

        backups.sort_by(|a, b| b.stamp.cmp(&a.stamp));
        Ok(backups)
    }

    async fn delete(&self, handle: &BackupHandle) -> Result<(), DeployError> {
        debug!("Deleting backup: {}", handle.path);
        self.transport
            .exec_ok(
                &CommandSpec::new("rm").args(["-f", handle.path.as_str()]),
                DeployError::BackupError,
            )
            .await?;
        Ok(())
    }

    async fn restore(&self, handle: &BackupHandle) -> Result<(), DeployError> {
        if !self.file_exists(&handle.path).await? {
            return Err(DeployError::BackupError(format!(
                "Backup {} no longer exists",
                handle.path
            )));
        }

        let dir = self.data_dir();
        self.transport
            .exec_ok(
                &CommandSpec::new("mkdir").args(["-p", dir.as_str()]),
                DeployError::BackupError,
            )
            .await?;
        let live = self.data_file();
        self.copy_atomic(&handle.path, &live).await?;
        info!("Restored {} from {}", live, handle.name);
        Ok(())
    }
}
