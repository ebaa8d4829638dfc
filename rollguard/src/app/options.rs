//! Application configuration options

use std::time::Duration;

use crate::deploy::orchestrator::DeployOptions;
use crate::errors::DeployError;
use crate::health::monitor::MonitorPolicy;
use crate::health::verifier::RetryPolicy;
use crate::runtime::transport::{SshTarget, Transport};
use crate::storage::settings::Settings;

/// Values given on the command line. Each one that is set replaces the
/// corresponding settings file value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub health_endpoint: Option<String>,
    pub max_attempts: Option<u32>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub monitor_minutes: Option<u64>,
    pub monitor_interval_secs: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub retention: Option<usize>,
    pub data_file: Option<String>,
    pub data_mount: Option<String>,
    pub docker_bin: Option<String>,
    pub ssh_target: Option<String>,
    pub ssh_options: Vec<String>,
}

impl Overrides {
    /// Apply the overrides on top of `settings`
    pub fn apply(&self, mut settings: Settings) -> Settings {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut settings.health.endpoint, &self.health_endpoint);
        set(&mut settings.health.max_attempts, &self.max_attempts);
        set(&mut settings.health.interval_secs, &self.interval_secs);
        set(&mut settings.health.timeout_secs, &self.timeout_secs);
        set(&mut settings.monitor.duration_minutes, &self.monitor_minutes);
        set(&mut settings.monitor.interval_secs, &self.monitor_interval_secs);
        set(
            &mut settings.monitor.max_consecutive_failures,
            &self.max_consecutive_failures,
        );
        set(&mut settings.backup.retention, &self.retention);
        set(&mut settings.backup.data_file, &self.data_file);
        set(&mut settings.backup.data_mount, &self.data_mount);
        set(&mut settings.runtime.docker_bin, &self.docker_bin);
        if self.ssh_target.is_some() {
            settings.remote.ssh_target = self.ssh_target.clone();
        }
        if !self.ssh_options.is_empty() {
            settings.remote.ssh_options = self.ssh_options.clone();
        }
        settings
    }
}

/// Main application options, validated
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Orchestrator knobs
    pub deploy: DeployOptions,

    /// Health endpoint path
    pub health_endpoint: String,

    /// Per-request health check timeout
    pub request_timeout: Duration,

    /// Data file name under `{deployPath}/data`
    pub data_file: String,

    /// Mount point of the data directory inside the instance
    pub data_mount: String,

    pub docker_bin: String,

    /// Where runtime, backup and metadata commands run
    pub transport: Transport,
}

impl AppOptions {
    /// Validate merged settings
    pub fn from_settings(settings: &Settings) -> Result<Self, DeployError> {
        let health = RetryPolicy::new(
            settings.health.max_attempts,
            Duration::from_secs(settings.health.interval_secs),
        )?;
        let monitor = MonitorPolicy::new(
            settings.monitor.duration_minutes,
            settings.monitor.interval_secs,
            settings.monitor.max_consecutive_failures,
        )?;

        if settings.backup.retention == 0 {
            return Err(DeployError::ConfigError(
                "Backup retention must be at least 1".to_string(),
            ));
        }
        if settings.health.timeout_secs == 0 {
            return Err(DeployError::ConfigError(
                "Health check timeout must be at least 1 second".to_string(),
            ));
        }

        let data_file = settings.backup.data_file.trim();
        if data_file.is_empty() || data_file.contains('/') || data_file == "." || data_file == ".."
        {
            return Err(DeployError::ConfigError(format!(
                "Invalid data file name: {:?}",
                settings.backup.data_file
            )));
        }
        if !settings.backup.data_mount.starts_with('/') {
            return Err(DeployError::ConfigError(format!(
                "Data mount must be an absolute path: {:?}",
                settings.backup.data_mount
            )));
        }
        if settings.runtime.docker_bin.trim().is_empty() {
            return Err(DeployError::ConfigError("Docker binary is empty".to_string()));
        }

        let transport = match settings.remote.ssh_target.as_deref().map(str::trim) {
            Some(destination) if !destination.is_empty() => Transport::Ssh(SshTarget {
                destination: destination.to_string(),
                options: settings.remote.ssh_options.clone(),
            }),
            _ => Transport::Local,
        };

        Ok(Self {
            deploy: DeployOptions {
                health,
                monitor,
                backup_retention: settings.backup.retention,
                log_tail_lines: settings.runtime.log_tail_lines,
            },
            health_endpoint: settings.health.endpoint.clone(),
            request_timeout: Duration::from_secs(settings.health.timeout_secs),
            data_file: data_file.to_string(),
            data_mount: settings.backup.data_mount.clone(),
            docker_bin: settings.runtime.docker_bin.clone(),
            transport,
        })
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            deploy: DeployOptions::default(),
            health_endpoint: "/health".to_string(),
            request_timeout: Duration::from_secs(5),
            data_file: crate::storage::layout::DEFAULT_DATA_FILE.to_string(),
            data_mount: "/app/data".to_string(),
            docker_bin: "docker".to_string(),
            transport: Transport::Local,
        }
    }
}
