//! Backups of the live data file
//!
//! Backups sit next to the data file as `<file>.backup.<stamp>`. Stamps are
//! fixed-width UTC timestamps with millisecond precision, so sorting names
//! sorts backups by creation time.

pub mod local;
pub mod remote;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::errors::DeployError;

/// Default number of backups kept after pruning
pub const DEFAULT_RETENTION: usize = 10;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Creation stamp of a backup, e.g. `20261018_142501_123`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupStamp(String);

impl BackupStamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format(STAMP_FORMAT).to_string())
    }

    /// Accepts exactly `YYYYMMDD_HHMMSS_mmm`
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = raw.as_bytes();
        if bytes.len() != 19 {
            return None;
        }
        let shape_ok = bytes.iter().enumerate().all(|(i, b)| match i {
            8 | 15 => *b == b'_',
            _ => b.is_ascii_digit(),
        });
        shape_ok.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackupStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A snapshot on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    /// File name, `<file>.backup.<stamp>`
    pub name: String,

    /// Full path on the target host
    pub path: String,

    pub stamp: BackupStamp,
}

/// Result of a snapshot request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Taken(BackupHandle),

    /// No live data file yet, so there was nothing to back up
    Skipped,
}

impl Snapshot {
    pub fn handle(&self) -> Option<&BackupHandle> {
        match self {
            Snapshot::Taken(handle) => Some(handle),
            Snapshot::Skipped => None,
        }
    }
}

/// Outcome of a prune pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: usize,
    pub removed: Vec<String>,
    /// Backups that could not be deleted, with the reason
    pub failed: Vec<(String, String)>,
}

/// Backup name for a data file and stamp
pub fn backup_name(data_file_name: &str, stamp: &BackupStamp) -> String {
    format!("{}.backup.{}", data_file_name, stamp)
}

/// Stamp of a backup file name, `None` for anything else (including
/// in-flight `.tmp` copies)
pub fn parse_backup_name(data_file_name: &str, file_name: &str) -> Option<BackupStamp> {
    file_name
        .strip_prefix(data_file_name)
        .and_then(|rest| rest.strip_prefix(".backup."))
        .and_then(BackupStamp::parse)
}

/// Sort newest first and split into (kept, expired)
pub fn partition_for_retention(
    mut backups: Vec<BackupHandle>,
    retention: usize,
) -> (Vec<BackupHandle>, Vec<BackupHandle>) {
    backups.sort_by(|a, b| b.stamp.cmp(&a.stamp));
    let expired = if backups.len() > retention {
        backups.split_off(retention)
    } else {
        Vec::new()
    };
    (backups, expired)
}

/// Snapshot, retention and restore of the live data file
#[async_trait]
pub trait BackupManager: Send + Sync {
    /// Human-readable location of the backups, for messages
    fn location(&self) -> String;

    /// Copy the live data file to a new backup. Returns `Skipped` when the
    /// data file does not exist yet.
    async fn snapshot(&self) -> Result<Snapshot, DeployError>;

    /// All backups, newest first
    async fn list(&self) -> Result<Vec<BackupHandle>, DeployError>;

    async fn delete(&self, handle: &BackupHandle) -> Result<(), DeployError>;

    /// Copy a backup over the live data file. The serving instance must be
    /// stopped.
    async fn restore(&self, handle: &BackupHandle) -> Result<(), DeployError>;

    async fn latest(&self) -> Result<BackupHandle, DeployError> {
        self.list()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeployError::NoBackupAvailable(self.location()))
    }

    /// Delete every backup beyond the `retention` newest. Deletion failures
    /// are logged and reported, never returned as errors.
    async fn prune(&self, retention: usize) -> Result<PruneReport, DeployError> {
        if retention == 0 {
            return Err(DeployError::ValidationError(
                "Backup retention must be at least 1".to_string(),
            ));
        }

        let (kept, expired) = partition_for_retention(self.list().await?, retention);
        let mut report = PruneReport {
            kept: kept.len(),
            ..Default::default()
        };

        for handle in expired {
            match self.delete(&handle).await {
                Ok(()) => {
                    info!("Pruned old backup: {}", handle.name);
                    report.removed.push(handle.name);
                }
                Err(e) => {
                    warn!("Failed to prune backup {}: {}", handle.name, e);
                    report.failed.push((handle.name, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
