//! Extended post-deployment monitoring
//!
//! Answers "is the running system stable over time". Each check is a single
//! probe: a run of failures is the signal, so nothing is retried in place.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::errors::DeployError;
use crate::health::HealthProbe;

/// Window and failure threshold of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub duration_minutes: u64,
    pub interval_secs: u64,
    pub max_consecutive_failures: u32,
}

impl MonitorPolicy {
    pub fn new(
        duration_minutes: u64,
        interval_secs: u64,
        max_consecutive_failures: u32,
    ) -> Result<Self, DeployError> {
        if interval_secs == 0 {
            return Err(DeployError::ConfigError(
                "Monitor interval must be at least 1 second".to_string(),
            ));
        }
        if max_consecutive_failures == 0 {
            return Err(DeployError::ConfigError(
                "Monitor failure threshold must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            duration_minutes,
            interval_secs,
            max_consecutive_failures,
        })
    }

    /// `floor(duration_minutes * 60 / interval_secs)`
    pub fn total_checks(&self) -> u64 {
        self.duration_minutes.saturating_mul(60) / self.interval_secs.max(1)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            duration_minutes: 10,
            interval_secs: 30,
            max_consecutive_failures: 3,
        }
    }
}

/// Verdict of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum MonitorReport {
    /// The window elapsed without hitting the threshold
    Stable { failures: u64, checks: u64 },

    /// The consecutive failure threshold was reached after `checks` probes
    Unstable { failures: u64, checks: u64 },
}

impl MonitorReport {
    pub fn is_stable(&self) -> bool {
        matches!(self, MonitorReport::Stable { .. })
    }
}

/// Run the monitor window.
///
/// Each iteration waits one interval, then probes once. Returns as soon as
/// `max_consecutive_failures` probes in a row fail.
pub async fn monitor(probe: &dyn HealthProbe, policy: &MonitorPolicy) -> MonitorReport {
    let total_checks = policy.total_checks();
    info!(
        "Monitoring {} for {} minute(s): {} checks every {}s, failing after {} consecutive failures",
        probe.target(),
        policy.duration_minutes,
        total_checks,
        policy.interval_secs,
        policy.max_consecutive_failures
    );

    let mut consecutive: u32 = 0;
    let mut failures: u64 = 0;

    for check in 1..=total_checks {
        tokio::time::sleep(policy.interval()).await;

        let verdict = probe.probe().await;
        if verdict.healthy {
            if consecutive > 0 {
                info!("Check {}/{} recovered after {} failure(s)", check, total_checks, consecutive);
            }
            consecutive = 0;
            continue;
        }

        consecutive += 1;
        failures += 1;
        warn!(
            "Check {}/{} failed ({} consecutive, {} total): {}",
            check,
            total_checks,
            consecutive,
            failures,
            verdict.describe()
        );

        if consecutive >= policy.max_consecutive_failures {
            error!(
                "{} consecutive health check failures, service is unstable",
                consecutive
            );
            return MonitorReport::Unstable {
                failures,
                checks: check,
            };
        }
    }

    info!(
        "Monitoring window complete: {} check(s), {} isolated failure(s)",
        total_checks, failures
    );
    MonitorReport::Stable {
        failures,
        checks: total_checks,
    }
}
