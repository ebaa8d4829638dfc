//! Settings file management

use serde::{Deserialize, Serialize};

use crate::backup::DEFAULT_RETENTION;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::storage::layout::DEFAULT_DATA_FILE;

/// rollguard settings, read from `rollguard.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Startup health gate
    #[serde(default)]
    pub health: HealthSettings,

    /// Post-deployment monitor
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Data file snapshots
    #[serde(default)]
    pub backup: BackupSettings,

    /// Container runtime
    #[serde(default)]
    pub runtime: RuntimeSettings,

    /// Remote target, when deploying over ssh
    #[serde(default)]
    pub remote: RemoteSettings,
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it does not
    /// exist. A file that exists but does not parse is an error.
    pub async fn load_or_default(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json::<Settings>().await.map_err(|e| {
            DeployError::ConfigError(format!("Invalid settings file {}: {}", file.path().display(), e))
        })
    }
}

/// Health check settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Path appended to the base URL
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds between failed attempts
    #[serde(default = "default_health_interval")]
    pub interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_health_endpoint() -> String {
    "/health".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_health_interval() -> u64 {
    2
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            endpoint: default_health_endpoint(),
            max_attempts: default_max_attempts(),
            interval_secs: default_health_interval(),
            timeout_secs: default_request_timeout(),
        }
    }
}

/// Extended monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_monitor_minutes")]
    pub duration_minutes: u64,

    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

fn default_monitor_minutes() -> u64 {
    10
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_max_failures() -> u32 {
    3
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            duration_minutes: default_monitor_minutes(),
            interval_secs: default_monitor_interval(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

/// Backup settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Name of the data file under `{deployPath}/data`
    #[serde(default = "default_data_file")]
    pub data_file: String,

    /// Where the data directory is mounted inside the instance
    #[serde(default = "default_data_mount")]
    pub data_mount: String,

    #[serde(default = "default_retention")]
    pub retention: usize,
}

fn default_data_file() -> String {
    DEFAULT_DATA_FILE.to_string()
}

fn default_data_mount() -> String {
    "/app/data".to_string()
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            data_mount: default_data_mount(),
            retention: default_retention(),
        }
    }
}

/// Container runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Log lines captured from an unhealthy candidate
    #[serde(default = "default_log_tail")]
    pub log_tail_lines: usize,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_log_tail() -> usize {
    50
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            log_tail_lines: default_log_tail(),
        }
    }
}

/// ssh target settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// `user@host`; empty means local
    #[serde(default)]
    pub ssh_target: Option<String>,

    /// Extra `-o` options
    #[serde(default)]
    pub ssh_options: Vec<String>,
}
