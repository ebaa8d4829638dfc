//! Deployment models

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Host to container port mapping, written `host:container`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<u16, DeployError> {
            match part.trim().parse::<u16>() {
                Ok(0) | Err(_) => Err(DeployError::ValidationError(format!(
                    "Invalid port mapping: {}",
                    s
                ))),
                Ok(port) => Ok(port),
            }
        };

        match s.split_once(':') {
            Some((host, container)) => Ok(Self {
                host: parse(host)?,
                container: parse(container)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(Self {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Host path (or named volume) to container path mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub source: String,
    pub target: String,
}

impl fmt::Display for VolumeMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}

impl FromStr for VolumeMapping {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((source, target)) if !source.is_empty() && !target.is_empty() => Ok(Self {
                source: source.to_string(),
                target: target.to_string(),
            }),
            _ => Err(DeployError::ValidationError(format!(
                "Invalid volume mapping: {}",
                s
            ))),
        }
    }
}

/// How a candidate is brought up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionMode {
    /// One container per instance, driven by the docker CLI
    Container,

    /// One compose project per instance
    Compose { file: PathBuf },
}

/// Immutable input of one deployment
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    /// Target environment identity (e.g. `staging`)
    pub environment: String,

    /// Image reference to deploy
    pub image: String,

    /// Canonical instance name
    pub name: String,

    /// Published ports
    pub ports: Vec<PortMapping>,

    /// Mounts, the data directory mount included
    pub volumes: Vec<VolumeMapping>,

    /// Environment passed to the instance
    pub env: Vec<(String, String)>,

    /// Root of the deployment on the target host
    pub deploy_path: PathBuf,

    /// Version identifier recorded on commit
    pub version: String,

    /// Base URL health checks are issued against
    pub health_base_url: String,

    pub mode: PromotionMode,
}

impl DeploymentRequest {
    /// Validate the invariants the orchestrator relies on
    pub fn validate(&self) -> Result<(), DeployError> {
        if self.image.trim().is_empty() {
            return Err(DeployError::ValidationError("Image reference is empty".to_string()));
        }
        validate_instance_name(&self.name)?;
        if self.deploy_path.as_os_str().is_empty() {
            return Err(DeployError::ValidationError("Deploy path is empty".to_string()));
        }
        if self.version.trim().is_empty() || self.version.contains('\n') {
            return Err(DeployError::ValidationError(format!(
                "Invalid version identifier: {:?}",
                self.version
            )));
        }
        url::Url::parse(&self.health_base_url).map_err(|e| {
            DeployError::ValidationError(format!(
                "Invalid health URL {}: {}",
                self.health_base_url, e
            ))
        })?;
        Ok(())
    }
}

/// Instance names must be usable as container and compose project names
pub fn validate_instance_name(name: &str) -> Result<(), DeployError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .next()
            .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(DeployError::ValidationError(format!(
            "Invalid instance name {:?}: use lowercase letters, digits, '-' and '_'",
            name
        )))
    }
}

/// Version identifier derived from an image reference: the digest if
/// pinned, otherwise the tag, otherwise `latest`
pub fn version_from_image(image: &str) -> String {
    if let Some((_, digest)) = image.split_once('@') {
        return digest.to_string();
    }

    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.split_once(':') {
        Some((_, tag)) if !tag.is_empty() => tag.to_string(),
        _ => "latest".to_string(),
    }
}

/// The two facts persisted after a successful commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentMetadata {
    /// Deployed version identifier
    pub version: String,

    /// When the deployment was committed
    pub deployed_at: DateTime<Utc>,
}

impl DeploymentMetadata {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            deployed_at: Utc::now(),
        }
    }

    /// Timestamp as written to `last-deployment.txt`
    pub fn deployed_at_string(&self) -> String {
        self.deployed_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}
