//! Deployment orchestrator
//!
//! Drives one deployment attempt from `Init` to a terminal state. Each state
//! has a handler that performs its side effects and returns the event fed
//! back into the state machine, so the order of operations is exactly the
//! order of the transitions.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupManager, DEFAULT_RETENTION};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState, FailureKind};
use crate::deploy::rollback::{RollbackExecutor, RollbackSummary};
use crate::errors::DeployError;
use crate::health::monitor::{monitor, MonitorPolicy, MonitorReport};
use crate::health::verifier::{verify, Health, RetryPolicy};
use crate::health::HealthProbe;
use crate::models::deployment::{DeploymentMetadata, DeploymentRequest};
use crate::models::instance::{InstanceNames, InstanceSpec};
use crate::runtime::Runtime;
use crate::storage::metadata::MetadataStore;

/// Default number of log lines captured from an unhealthy candidate
pub const DEFAULT_LOG_TAIL_LINES: usize = 50;

/// The external capabilities a deployment runs against
#[derive(Clone)]
pub struct Capabilities {
    pub runtime: Arc<dyn Runtime>,
    pub backups: Arc<dyn BackupManager>,
    pub metadata: Arc<dyn MetadataStore>,
    pub probe: Arc<dyn HealthProbe>,
}

/// Validated knobs of one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    pub health: RetryPolicy,
    pub monitor: MonitorPolicy,
    pub backup_retention: usize,
    pub log_tail_lines: usize,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            health: RetryPolicy::default(),
            monitor: MonitorPolicy::default(),
            backup_retention: DEFAULT_RETENTION,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

/// Outcome of one `deploy` invocation
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub name: String,
    pub image: String,
    pub version: String,

    /// Every state visited, terminal state last
    pub history: Vec<DeploymentState>,

    /// Snapshot taken before promotion, `None` on a fresh environment
    pub backup: Option<String>,

    /// Startup gate attempts and whether it passed
    pub health_attempts: Option<u32>,
    pub healthy: Option<bool>,

    /// Version reported by the service after commit
    pub reported_version: Option<String>,

    pub monitor: Option<MonitorReport>,

    pub rollback: Option<RollbackSummary>,
}

impl DeploymentReport {
    fn new(request: &DeploymentRequest) -> Self {
        Self {
            name: request.name.clone(),
            image: request.image.clone(),
            version: request.version.clone(),
            history: Vec::new(),
            backup: None,
            health_attempts: None,
            healthy: None,
            reported_version: None,
            monitor: None,
            rollback: None,
        }
    }

    /// Terminal state of the attempt
    pub fn final_state(&self) -> Option<&DeploymentState> {
        self.history.last()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.final_state(), Some(DeploymentState::Succeeded))
    }

    /// Map the terminal state to the error the process exits with
    pub fn into_result(self) -> Result<Self, DeployError> {
        let failure = match self.final_state() {
            Some(DeploymentState::Succeeded) => return Ok(self),
            Some(DeploymentState::Failed { failure }) => failure.clone(),
            other => {
                return Err(DeployError::Internal(format!(
                    "Deployment stopped in a non-terminal state: {:?}",
                    other
                )))
            }
        };

        Err(match failure {
            FailureKind::Aborted { error } => DeployError::Aborted(error),
            FailureKind::RolledBack { cause } => DeployError::RolledBack(cause.to_string()),
            FailureKind::RollbackExhausted { cause, error } => {
                DeployError::RollbackExhausted(format!("{} (after {})", error, cause))
            }
        })
    }
}

/// Where the candidate of the current attempt lives
#[derive(Debug, Default)]
struct Attempt {
    candidate: Option<String>,
}

/// Runs deployments against a set of capabilities
pub struct Orchestrator {
    caps: Capabilities,
    options: DeployOptions,
    rollback: RollbackExecutor,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, options: DeployOptions) -> Self {
        let rollback = RollbackExecutor::new(caps.runtime.clone(), caps.backups.clone());
        Self {
            caps,
            options,
            rollback,
        }
    }

    /// Run one deployment attempt to a terminal state.
    ///
    /// Returns `Err` only for an invalid request or an invalid transition;
    /// every operational failure is carried by the report.
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeploymentReport, DeployError> {
        request.validate()?;

        let names = InstanceNames::new(&request.name);
        let mut fsm = DeploymentFsm::new();
        let mut report = DeploymentReport::new(request);
        let mut attempt = Attempt::default();

        info!(
            "Deploying {} as {} to {} ({})",
            request.image, request.name, request.environment, request.version
        );

        loop {
            let event = match fsm.state().clone() {
                DeploymentState::Init => DeploymentEvent::Begin,
                DeploymentState::Backup => self.take_backup(&mut report).await,
                DeploymentState::Pulling => self.pull(request).await,
                DeploymentState::Promoting => self.promote(request, &names, &mut attempt).await,
                DeploymentState::Verifying => self.verify(&attempt, &mut report).await,
                DeploymentState::Committing => {
                    self.commit(request, &names, &attempt, &mut report).await
                }
                DeploymentState::Monitoring => self.watch(&mut report).await,
                DeploymentState::Done => self.retire_previous(&names).await,
                DeploymentState::RollingBack { cause } => {
                    error!("Rolling back {}: {}", names.canonical, cause);
                    self.roll_back(&names, &mut report).await
                }
                DeploymentState::Succeeded | DeploymentState::Failed { .. } => break,
            };

            let next = fsm.process(event)?;
            info!("==> {}", next);
        }

        report.history = fsm.history().to_vec();
        match fsm.state() {
            DeploymentState::Succeeded => info!("Deployment of {} succeeded", request.version),
            DeploymentState::Failed { failure } => error!("Deployment failed: {:?}", failure),
            _ => {}
        }
        Ok(report)
    }

    async fn take_backup(&self, report: &mut DeploymentReport) -> DeploymentEvent {
        let snapshot = match self.caps.backups.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Backup failed, refusing to deploy without one: {}", e);
                return DeploymentEvent::BackupFailed(e.to_string());
            }
        };

        if let Some(handle) = snapshot.handle() {
            report.backup = Some(handle.name.clone());

            // Retention runs only after a new snapshot exists
            match self.caps.backups.prune(self.options.backup_retention).await {
                Ok(pruned) if !pruned.removed.is_empty() => info!(
                    "Pruned {} old backup(s), {} kept",
                    pruned.removed.len(),
                    pruned.kept
                ),
                Ok(_) => {}
                Err(e) => warn!("Failed to prune backups: {}", e),
            }
        }

        DeploymentEvent::BackupReady
    }

    async fn pull(&self, request: &DeploymentRequest) -> DeploymentEvent {
        info!("Pulling {}", request.image);
        match self.caps.runtime.pull(&request.image).await {
            Ok(()) => DeploymentEvent::PullSucceeded,
            Err(e) => {
                error!("Failed to pull {}: {}", request.image, e);
                DeploymentEvent::PullFailed(e.to_string())
            }
        }
    }

    async fn promote(
        &self,
        request: &DeploymentRequest,
        names: &InstanceNames,
        attempt: &mut Attempt,
    ) -> DeploymentEvent {
        let runtime = &self.caps.runtime;

        // Leftovers of an interrupted run; the serving instance is untouched
        if let Err(e) = runtime.remove(&names.candidate).await {
            return DeploymentEvent::PromotionAborted(format!(
                "failed to remove stale {}: {}",
                names.candidate, e
            ));
        }

        let has_active = match runtime.exists(&names.canonical).await {
            Ok(exists) => exists,
            Err(e) => return DeploymentEvent::PromotionAborted(e.to_string()),
        };

        if has_active {
            if let Err(e) = runtime.remove(&names.previous).await {
                return DeploymentEvent::PromotionAborted(format!(
                    "failed to remove stale {}: {}",
                    names.previous, e
                ));
            }
            info!("Setting {} aside as {}", names.canonical, names.previous);
            if let Err(e) = runtime.rename(&names.canonical, &names.previous).await {
                return DeploymentEvent::PromotionAborted(format!(
                    "failed to rename {}: {}",
                    names.canonical, e
                ));
            }
            if let Err(e) = runtime.stop(&names.previous).await {
                error!("Failed to stop {}: {}", names.previous, e);
                return DeploymentEvent::PromotionFailed(e.to_string());
            }
        }

        let has_previous = if has_active {
            true
        } else {
            match runtime.exists(&names.previous).await {
                Ok(exists) => exists,
                Err(e) => return DeploymentEvent::PromotionAborted(e.to_string()),
            }
        };

        let candidate = if has_previous {
            names.candidate.clone()
        } else {
            info!("No previous instance, first deployment of {}", names.canonical);
            names.canonical.clone()
        };

        let spec = InstanceSpec {
            name: candidate.clone(),
            image: request.image.clone(),
            ports: request.ports.clone(),
            volumes: request.volumes.clone(),
            env: request.env.clone(),
        };

        info!("Starting candidate {}", candidate);
        attempt.candidate = Some(candidate.clone());
        match runtime.run(&spec).await {
            Ok(()) => DeploymentEvent::CandidateStarted,
            Err(e) => {
                error!("Failed to start {}: {}", candidate, e);
                DeploymentEvent::PromotionFailed(e.to_string())
            }
        }
    }

    async fn verify(&self, attempt: &Attempt, report: &mut DeploymentReport) -> DeploymentEvent {
        info!(
            "Verifying {} ({} attempt(s), {}s apart)",
            self.caps.probe.target(),
            self.options.health.max_attempts,
            self.options.health.interval.as_secs()
        );

        match verify(self.caps.probe.as_ref(), &self.options.health).await {
            Health::Healthy { attempts } => {
                report.health_attempts = Some(attempts);
                report.healthy = Some(true);
                DeploymentEvent::Healthy
            }
            Health::Unhealthy { attempts, last } => {
                report.health_attempts = Some(attempts);
                report.healthy = Some(false);
                error!(
                    "Candidate failed {} health check(s), last: {}",
                    attempts,
                    last.map(|v| v.describe()).unwrap_or_else(|| "none".to_string())
                );
                if let Some(candidate) = &attempt.candidate {
                    self.capture_diagnostics(candidate).await;
                }
                DeploymentEvent::Unhealthy { attempts }
            }
        }
    }

    async fn capture_diagnostics(&self, name: &str) {
        match self.caps.runtime.status(name).await {
            Ok(status) => error!("{} status: {}", name, status),
            Err(e) => debug!("Could not read status of {}: {}", name, e),
        }
        match self.caps.runtime.logs(name, self.options.log_tail_lines).await {
            Ok(logs) if !logs.trim().is_empty() => {
                error!("Last {} log line(s) of {}:", self.options.log_tail_lines, name);
                for line in logs.lines() {
                    error!("  {}", line);
                }
            }
            Ok(_) => error!("{} produced no output", name),
            Err(e) => warn!("Could not read logs of {}: {}", name, e),
        }
    }

    async fn commit(
        &self,
        request: &DeploymentRequest,
        names: &InstanceNames,
        attempt: &Attempt,
        report: &mut DeploymentReport,
    ) -> DeploymentEvent {
        if let Some(candidate) = attempt.candidate.as_deref() {
            if candidate != names.canonical {
                info!("Promoting {} to {}", candidate, names.canonical);
                if let Err(e) = self.caps.runtime.rename(candidate, &names.canonical).await {
                    error!("Failed to rename {}: {}", candidate, e);
                    return DeploymentEvent::CommitFailed(e.to_string());
                }
            }
        }

        let metadata = DeploymentMetadata::new(request.version.clone());
        match self.caps.metadata.record(&metadata).await {
            Ok(()) => info!(
                "Recorded version {} at {}",
                metadata.version,
                metadata.deployed_at_string()
            ),
            Err(e) => error!("Failed to record deployment metadata: {}", e),
        }

        match self.caps.probe.version().await {
            Some(reported) if reported == request.version => {
                info!("Service reports version {}", reported);
                report.reported_version = Some(reported);
            }
            Some(reported) => {
                warn!(
                    "Service reports version {}, expected {}",
                    reported, request.version
                );
                report.reported_version = Some(reported);
            }
            None => debug!("Service does not report a version"),
        }

        DeploymentEvent::Committed
    }

    async fn watch(&self, report: &mut DeploymentReport) -> DeploymentEvent {
        let verdict = monitor(self.caps.probe.as_ref(), &self.options.monitor).await;
        report.monitor = Some(verdict);
        match verdict {
            MonitorReport::Stable { .. } => DeploymentEvent::Stable,
            MonitorReport::Unstable { failures, checks } => {
                DeploymentEvent::Unstable { failures, checks }
            }
        }
    }

    async fn retire_previous(&self, names: &InstanceNames) -> DeploymentEvent {
        let runtime = &self.caps.runtime;
        if let Err(e) = runtime.stop(&names.previous).await {
            warn!("Failed to stop {}: {}", names.previous, e);
        }
        match runtime.remove(&names.previous).await {
            Ok(()) => debug!("Removed {}", names.previous),
            Err(e) => warn!("Failed to remove {}: {}", names.previous, e),
        }
        DeploymentEvent::Finished
    }

    async fn roll_back(&self, names: &InstanceNames, report: &mut DeploymentReport) -> DeploymentEvent {
        match self.rollback.rollback(names).await {
            Ok(summary) => {
                if summary.is_clean() {
                    info!("Rollback complete, {} restored", names.canonical);
                } else {
                    error!(
                        "Rollback finished with {} failed step(s): {}",
                        summary.step_errors.len(),
                        summary.step_errors.join("; ")
                    );
                }
                report.rollback = Some(summary);
                DeploymentEvent::RollbackCompleted
            }
            Err(e) => {
                error!("==================================================");
                error!("ROLLBACK FAILED: operator intervention required");
                error!("{}", e);
                error!("==================================================");
                DeploymentEvent::RollbackExhausted(e.to_string())
            }
        }
    }
}
