//! Backups on the local filesystem

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backup::{backup_name, parse_backup_name, BackupHandle, BackupManager, BackupStamp, Snapshot};
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::storage::layout::DeployLayout;

/// Backups written next to a local data file
#[derive(Debug, Clone)]
pub struct LocalBackups {
    layout: DeployLayout,
}

impl LocalBackups {
    pub fn new(layout: DeployLayout) -> Self {
        Self { layout }
    }

    /// Pick a stamp whose file does not exist yet
    async fn fresh_target(&self) -> Result<(BackupStamp, File), DeployError> {
        for _ in 0..5 {
            let stamp = BackupStamp::now();
            let target = self
                .layout
                .data_dir()
                .file(&backup_name(&self.layout.data_file_name, &stamp));
            if !target.exists().await {
                return Ok((stamp, target));
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        Err(DeployError::BackupError(
            "Unable to allocate a unique backup name".to_string(),
        ))
    }
}

#[async_trait]
impl BackupManager for LocalBackups {
    fn location(&self) -> String {
        self.layout.data_dir().path().display().to_string()
    }

    async fn snapshot(&self) -> Result<Snapshot, DeployError> {
        let source = self.layout.data_file();
        if !source.exists().await {
            info!(
                "No data file at {}, skipping backup (first deployment)",
                source.path().display()
            );
            return Ok(Snapshot::Skipped);
        }

        let (stamp, target) = self.fresh_target().await?;
        source.copy_atomic(&target).await.map_err(|e| {
            DeployError::BackupError(format!(
                "Failed to write {}: {}",
                target.path().display(),
                e
            ))
        })?;

        let expected = source.sha256().await?;
        let actual = target.sha256().await?;
        if expected != actual {
            let _ = target.delete().await;
            return Err(DeployError::BackupError(format!(
                "Checksum mismatch for {} (expected {}, got {})",
                target.path().display(),
                expected,
                actual
            )));
        }

        info!("Backup created: {}", target.path().display());
        Ok(Snapshot::Taken(BackupHandle {
            name: target.name(),
            path: target.path().display().to_string(),
            stamp,
        }))
    }

    async fn list(&self) -> Result<Vec<BackupHandle>, DeployError> {
        let prefix = self.layout.backup_prefix();
        let mut backups: Vec<BackupHandle> = self
            .layout
            .data_dir()
            .files_where(|name| name.starts_with(&prefix))
            .await?
            .into_iter()
            .filter_map(|file| {
                let name = file.name();
                parse_backup_name(&self.layout.data_file_name, &name).map(|stamp| BackupHandle {
                    name,
                    path: file.path().display().to_string(),
                    stamp,
                })
            })
            .collect();

        backups.sort_by(|a, b| b.stamp.cmp(&a.stamp));
        Ok(backups)
    }

    async fn delete(&self, handle: &BackupHandle) -> Result<(), DeployError> {
        debug!("Deleting backup: {}", handle.path);
        File::new(&handle.path).delete().await
    }

    async fn restore(&self, handle: &BackupHandle) -> Result<(), DeployError> {
        let backup = File::new(&handle.path);
        if !backup.exists().await {
            return Err(DeployError::BackupError(format!(
                "Backup {} no longer exists",
                handle.path
            )));
        }

        let live = self.layout.data_file();
        backup.copy_atomic(&live).await?;
        info!("Restored {} from {}", live.path().display(), handle.name);
        Ok(())
    }
}
