//! Removal of leftover candidate and previous instances

use serde::Serialize;
use tracing::{info, warn};

use crate::models::instance::InstanceNames;
use crate::runtime::Runtime;

/// What a cleanup run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub images_pruned: bool,
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Stop and remove `<name>-candidate` and `<name>-previous`, then optionally
/// prune dangling images. Never touches the canonical instance.
pub async fn cleanup(runtime: &dyn Runtime, name: &str, prune_images: bool) -> CleanupReport {
    let names = InstanceNames::new(name);
    let mut report = CleanupReport::default();

    for leftover in [&names.candidate, &names.previous] {
        match runtime.exists(leftover).await {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!("Failed to look up {}: {}", leftover, e);
                report.failures.push(format!("find {}: {}", leftover, e));
                continue;
            }
        }

        if let Err(e) = runtime.stop(leftover).await {
            warn!("Failed to stop {}: {}", leftover, e);
            report.failures.push(format!("stop {}: {}", leftover, e));
        }
        match runtime.remove(leftover).await {
            Ok(()) => {
                info!("Removed {}", leftover);
                report.removed.push(leftover.clone());
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", leftover, e);
                report.failures.push(format!("remove {}: {}", leftover, e));
            }
        }
    }

    if prune_images {
        match runtime.prune_images().await {
            Ok(()) => {
                info!("Pruned dangling images");
                report.images_pruned = true;
            }
            Err(e) => {
                warn!("Failed to prune images: {}", e);
                report.failures.push(format!("prune images: {}", e));
            }
        }
    }

    report
}
