//! Startup health gate
//!
//! Answers "is the new version viable at all". Retries absorb startup
//! jitter; the first 200 ends the wait.

use std::time::Duration;

use tracing::{info, warn};

use crate::errors::DeployError;
use crate::health::{HealthProbe, HealthVerdict};

/// Attempt budget of the verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self, DeployError> {
        if max_attempts == 0 {
            return Err(DeployError::ConfigError(
                "Health check attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            interval: Duration::from_secs(2),
        }
    }
}

/// Verdict of the startup gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy { attempts: u32 },
    Unhealthy { attempts: u32, last: Option<HealthVerdict> },
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Health::Healthy { .. })
    }
}

/// Probe until the first healthy verdict or until the attempts run out.
/// Sleeps `interval` between failed attempts, never after the last one.
pub async fn verify(probe: &dyn HealthProbe, policy: &RetryPolicy) -> Health {
    let mut last = None;

    for attempt in 1..=policy.max_attempts {
        let verdict = probe.probe().await;
        if verdict.healthy {
            info!(
                "Health check passed on attempt {}/{} ({})",
                attempt,
                policy.max_attempts,
                verdict.describe()
            );
            return Health::Healthy { attempts: attempt };
        }

        warn!(
            "Health check attempt {}/{} against {} failed: {}",
            attempt,
            policy.max_attempts,
            probe.target(),
            verdict.describe()
        );
        last = Some(verdict);

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Health::Unhealthy {
        attempts: policy.max_attempts,
        last,
    }
}
