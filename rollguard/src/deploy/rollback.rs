//! Rollback executor
//!
//! Every step runs once. A failing step is logged and recorded, then the
//! next step runs anyway. The only hard failure is having no previous
//! instance to bring back.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backup::BackupManager;
use crate::errors::DeployError;
use crate::models::instance::InstanceNames;
use crate::runtime::Runtime;

/// What a rollback managed to do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackSummary {
    /// Backup restored over the live data file
    pub restored_backup: Option<String>,

    /// Previous instance renamed back and started
    pub reinstated: bool,

    /// Steps that failed, in order
    pub step_errors: Vec<String>,
}

impl RollbackSummary {
    pub fn is_clean(&self) -> bool {
        self.reinstated && self.step_errors.is_empty()
    }
}

/// Reverses a failed promotion
pub struct RollbackExecutor {
    runtime: Arc<dyn Runtime>,
    backups: Arc<dyn BackupManager>,
}

impl RollbackExecutor {
    pub fn new(runtime: Arc<dyn Runtime>, backups: Arc<dyn BackupManager>) -> Self {
        Self { runtime, backups }
    }

    /// Tear down the failed candidate and canonical instances, restore the
    /// latest backup, then bring the previous instance back under the
    /// canonical name.
    pub async fn rollback(&self, names: &InstanceNames) -> Result<RollbackSummary, DeployError> {
        warn!("Rolling back {}", names.canonical);
        let mut summary = RollbackSummary::default();

        // 1. Tear down whatever failed
        for failed in [&names.candidate, &names.canonical] {
            if let Err(e) = self.runtime.stop(failed).await {
                error!("Failed to stop {}: {}", failed, e);
                summary.step_errors.push(format!("stop {}: {}", failed, e));
            }
            if let Err(e) = self.runtime.remove(failed).await {
                error!("Failed to remove {}: {}", failed, e);
                summary.step_errors.push(format!("remove {}: {}", failed, e));
            }
        }

        // 2. Restore data while nothing is serving
        match self.backups.latest().await {
            Ok(handle) => match self.backups.restore(&handle).await {
                Ok(()) => summary.restored_backup = Some(handle.name),
                Err(e) => {
                    error!("Failed to restore backup {}: {}", handle.name, e);
                    summary.step_errors.push(format!("restore {}: {}", handle.name, e));
                }
            },
            Err(DeployError::NoBackupAvailable(location)) => {
                warn!("No backup in {}, leaving data as-is", location);
            }
            Err(e) => {
                error!("Failed to look up the latest backup: {}", e);
                summary.step_errors.push(format!("find backup: {}", e));
            }
        }

        // 3. Bring the previous instance back
        let has_previous = match self.runtime.exists(&names.previous).await {
            Ok(exists) => exists,
            Err(e) => {
                error!("Failed to look up {}: {}", names.previous, e);
                summary.step_errors.push(format!("find {}: {}", names.previous, e));
                false
            }
        };
        if !has_previous {
            return Err(DeployError::RollbackExhausted(format!(
                "no previous instance {} to restore; {} is down and needs manual intervention",
                names.previous, names.canonical
            )));
        }

        let reinstated_name = match self.runtime.rename(&names.previous, &names.canonical).await {
            Ok(()) => names.canonical.as_str(),
            Err(e) => {
                error!(
                    "Failed to rename {} to {}: {}",
                    names.previous, names.canonical, e
                );
                summary
                    .step_errors
                    .push(format!("rename {}: {}", names.previous, e));
                names.previous.as_str()
            }
        };

        match self.runtime.start(reinstated_name).await {
            Ok(()) => {
                info!("Previous instance is running again as {}", reinstated_name);
                summary.reinstated = true;
            }
            Err(e) => {
                error!("Failed to start {}: {}", reinstated_name, e);
                summary.step_errors.push(format!("start {}: {}", reinstated_name, e));
            }
        }

        Ok(summary)
    }
}
