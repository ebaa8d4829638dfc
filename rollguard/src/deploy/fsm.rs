//! Finite State Machine for a deployment attempt

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Why a deployment entered rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RollbackCause {
    /// The candidate could not be started, or the old instance not set aside
    PromotionFailed { error: String },

    /// The startup health gate ran out of attempts
    Unhealthy { attempts: u32 },

    /// The candidate could not take the canonical name
    CommitFailed { error: String },

    /// The monitor hit its consecutive failure threshold
    Unstable { failures: u64, checks: u64 },
}

impl fmt::Display for RollbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackCause::PromotionFailed { error } => write!(f, "promotion failed: {}", error),
            RollbackCause::Unhealthy { attempts } => {
                write!(f, "candidate unhealthy after {} attempt(s)", attempts)
            }
            RollbackCause::CommitFailed { error } => write!(f, "commit failed: {}", error),
            RollbackCause::Unstable { failures, checks } => write!(
                f,
                "service unstable during monitoring ({} failure(s) in {} check(s))",
                failures, checks
            ),
        }
    }
}

/// How a failed attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FailureKind {
    /// Stopped before anything was mutated
    Aborted { error: String },

    /// Rolled back to the previous instance
    RolledBack { cause: RollbackCause },

    /// Nothing to roll back to
    RollbackExhausted { cause: RollbackCause, error: String },
}

/// Deployment state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DeploymentState {
    Init,
    Backup,
    Pulling,
    Promoting,
    Verifying,
    Committing,
    Monitoring,
    Done,
    RollingBack { cause: RollbackCause },
    Succeeded,
    Failed { failure: FailureKind },
}

impl DeploymentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Succeeded | DeploymentState::Failed { .. })
    }

    /// Short name for progress lines
    pub fn label(&self) -> &'static str {
        match self {
            DeploymentState::Init => "INIT",
            DeploymentState::Backup => "BACKUP",
            DeploymentState::Pulling => "PULLING",
            DeploymentState::Promoting => "PROMOTING",
            DeploymentState::Verifying => "VERIFYING",
            DeploymentState::Committing => "COMMITTING",
            DeploymentState::Monitoring => "MONITORING",
            DeploymentState::Done => "DONE",
            DeploymentState::RollingBack { .. } => "ROLLING_BACK",
            DeploymentState::Succeeded => "SUCCEEDED",
            DeploymentState::Failed { .. } => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Start the attempt
    Begin,

    /// A snapshot was taken, or none was needed
    BackupReady,

    BackupFailed(String),

    PullSucceeded,

    PullFailed(String),

    CandidateStarted,

    /// Promotion stopped before the serving instance was touched
    PromotionAborted(String),

    PromotionFailed(String),

    Healthy,

    Unhealthy { attempts: u32 },

    Committed,

    CommitFailed(String),

    Stable,

    Unstable { failures: u64, checks: u64 },

    /// Previous instance is no longer needed
    Finished,

    RollbackCompleted,

    RollbackExhausted(String),
}

/// Pure transition function. Returns the next state or an
/// `InvalidTransition` error; never mutates anything.
pub fn transition(
    state: &DeploymentState,
    event: &DeploymentEvent,
) -> Result<DeploymentState, DeployError> {
    use DeploymentEvent as E;
    use DeploymentState as S;

    let next = match (state, event) {
        (S::Init, E::Begin) => S::Backup,

        (S::Backup, E::BackupReady) => S::Pulling,
        (S::Backup, E::BackupFailed(err)) => S::Failed {
            failure: FailureKind::Aborted { error: err.clone() },
        },

        (S::Pulling, E::PullSucceeded) => S::Promoting,
        (S::Pulling, E::PullFailed(err)) => S::Failed {
            failure: FailureKind::Aborted { error: err.clone() },
        },

        (S::Promoting, E::CandidateStarted) => S::Verifying,
        (S::Promoting, E::PromotionAborted(err)) => S::Failed {
            failure: FailureKind::Aborted { error: err.clone() },
        },
        (S::Promoting, E::PromotionFailed(err)) => S::RollingBack {
            cause: RollbackCause::PromotionFailed { error: err.clone() },
        },

        (S::Verifying, E::Healthy) => S::Committing,
        (S::Verifying, E::Unhealthy { attempts }) => S::RollingBack {
            cause: RollbackCause::Unhealthy { attempts: *attempts },
        },

        (S::Committing, E::Committed) => S::Monitoring,
        (S::Committing, E::CommitFailed(err)) => S::RollingBack {
            cause: RollbackCause::CommitFailed { error: err.clone() },
        },

        (S::Monitoring, E::Stable) => S::Done,
        (S::Monitoring, E::Unstable { failures, checks }) => S::RollingBack {
            cause: RollbackCause::Unstable {
                failures: *failures,
                checks: *checks,
            },
        },

        (S::Done, E::Finished) => S::Succeeded,

        (S::RollingBack { cause }, E::RollbackCompleted) => S::Failed {
            failure: FailureKind::RolledBack {
                cause: cause.clone(),
            },
        },
        (S::RollingBack { cause }, E::RollbackExhausted(err)) => S::Failed {
            failure: FailureKind::RollbackExhausted {
                cause: cause.clone(),
                error: err.clone(),
            },
        },

        (state, event) => {
            return Err(DeployError::InvalidTransition(format!(
                "{:?} -> {:?}",
                state, event
            )));
        }
    };

    Ok(next)
}

/// Deployment FSM that records every state it passes through
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    history: Vec<DeploymentState>,
}

impl DeploymentFsm {
    /// Create a new FSM in the init state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Init,
            history: vec![DeploymentState::Init],
        }
    }

    /// Get current state
    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// Every state visited, in order, the current one included
    pub fn history(&self) -> &[DeploymentState] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<&DeploymentState, DeployError> {
        let next = transition(&self.state, &event)?;
        self.history.push(next.clone());
        self.state = next;
        Ok(&self.state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
