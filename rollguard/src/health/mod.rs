//! Health probing, the startup verifier and the extended monitor

pub mod http;
pub mod monitor;
pub mod verifier;

use std::time::Duration;

use async_trait::async_trait;

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    pub healthy: bool,

    /// HTTP status, `None` when no response arrived
    pub status: Option<u16>,

    pub latency: Duration,

    /// Transport error (refused, timeout, ...) when there was no response
    pub error: Option<String>,
}

impl HealthVerdict {
    /// Verdict for a received response. Only status 200 is healthy; the body
    /// is never inspected.
    pub fn from_status(status: u16, latency: Duration) -> Self {
        Self {
            healthy: status == 200,
            status: Some(status),
            latency,
            error: None,
        }
    }

    /// Verdict for a request that got no response
    pub fn unreachable(error: impl Into<String>, latency: Duration) -> Self {
        Self {
            healthy: false,
            status: None,
            latency,
            error: Some(error.into()),
        }
    }

    /// Short description for log lines
    pub fn describe(&self) -> String {
        match (&self.status, &self.error) {
            (Some(status), _) => format!("HTTP {} in {}ms", status, self.latency.as_millis()),
            (None, Some(error)) => format!("no response ({})", error),
            (None, None) => "no response".to_string(),
        }
    }
}

/// A liveness endpoint that can be probed once
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Issue one probe. Never fails; unreachable endpoints are unhealthy.
    async fn probe(&self) -> HealthVerdict;

    /// Version the service reports about itself, if it exposes one
    async fn version(&self) -> Option<String> {
        None
    }

    /// What is being probed, for log lines
    fn target(&self) -> String;
}
