//! Instance roles and runtime specs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::deployment::{PortMapping, VolumeMapping};

/// The three names one logical service can occupy.
///
/// `previous` never holds the canonical name; the candidate holds it only
/// on a first deployment or once committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNames {
    pub canonical: String,
    pub candidate: String,
    pub previous: String,
}

impl InstanceNames {
    pub fn new(canonical: &str) -> Self {
        Self {
            canonical: canonical.to_string(),
            candidate: format!("{}-candidate", canonical),
            previous: format!("{}-previous", canonical),
        }
    }
}

/// Everything the runtime needs to create and start an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<VolumeMapping>,
    pub env: Vec<(String, String)>,
}

/// Runtime status of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running,
    Created,
    Restarting,
    Paused,
    Exited,
    Dead,
    Missing,
    Other(String),
}

impl InstanceStatus {
    /// Parse the status string reported by the container runtime
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "running" => InstanceStatus::Running,
            "created" => InstanceStatus::Created,
            "restarting" => InstanceStatus::Restarting,
            "paused" => InstanceStatus::Paused,
            "exited" => InstanceStatus::Exited,
            "dead" => InstanceStatus::Dead,
            "" => InstanceStatus::Missing,
            other => InstanceStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Created => write!(f, "created"),
            InstanceStatus::Restarting => write!(f, "restarting"),
            InstanceStatus::Paused => write!(f, "paused"),
            InstanceStatus::Exited => write!(f, "exited"),
            InstanceStatus::Dead => write!(f, "dead"),
            InstanceStatus::Missing => write!(f, "missing"),
            InstanceStatus::Other(s) => write!(f, "{}", s),
        }
    }
}
