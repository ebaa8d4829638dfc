//! End-to-end deployment attempts against in-memory capabilities

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use rollguard::backup::local::LocalBackups;
use rollguard::backup::BackupManager;
use rollguard::deploy::fsm::{DeploymentState, FailureKind, RollbackCause};
use rollguard::deploy::orchestrator::{Capabilities, DeployOptions, DeploymentReport, Orchestrator};
use rollguard::errors::DeployError;
use rollguard::health::monitor::{MonitorPolicy, MonitorReport};
use rollguard::health::verifier::RetryPolicy;
use rollguard::models::deployment::{DeploymentRequest, PortMapping, PromotionMode};
use rollguard::storage::layout::DeployLayout;
use rollguard::storage::metadata::LocalMetadata;

use crate::fakes::{BrokenBackups, FakeInstance, FakeRuntime, Journal, JournalingBackups, ScriptedProbe};

const V1: &str = "ghcr.io/acme/todo:v1";
const V2: &str = "ghcr.io/acme/todo:v2";

fn request(deploy_path: &Path, image: &str, version: &str) -> DeploymentRequest {
    DeploymentRequest {
        environment: "staging".to_string(),
        image: image.to_string(),
        name: "todo".to_string(),
        ports: vec![PortMapping {
            host: 8080,
            container: 3000,
        }],
        volumes: Vec::new(),
        env: Vec::new(),
        deploy_path: deploy_path.to_path_buf(),
        version: version.to_string(),
        health_base_url: "http://localhost:8080".to_string(),
        mode: PromotionMode::Container,
    }
}

fn options(monitor_minutes: u64) -> DeployOptions {
    DeployOptions {
        health: RetryPolicy::new(5, Duration::from_secs(2)).unwrap(),
        monitor: MonitorPolicy::new(monitor_minutes, 30, 3).unwrap(),
        backup_retention: 10,
        log_tail_lines: 20,
    }
}

struct Harness {
    dir: tempfile::TempDir,
    journal: Journal,
    layout: DeployLayout,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = DeployLayout::new(dir.path(), "app.db");
        Self {
            dir,
            journal: Journal::default(),
            layout,
        }
    }

    /// Existing deployment: live data file plus a running `todo` on v1
    fn with_live_data(self, contents: &str) -> Self {
        std::fs::create_dir_all(self.layout.data_dir().path()).unwrap();
        std::fs::write(self.layout.data_file().path(), contents).unwrap();
        self
    }

    fn runtime(&self) -> FakeRuntime {
        FakeRuntime::new(self.journal.clone())
    }

    fn backups(&self) -> Arc<dyn BackupManager> {
        Arc::new(JournalingBackups::new(
            LocalBackups::new(self.layout.clone()),
            self.journal.clone(),
        ))
    }

    fn orchestrator(
        &self,
        runtime: &FakeRuntime,
        backups: Arc<dyn BackupManager>,
        probe: Arc<ScriptedProbe>,
        options: DeployOptions,
    ) -> Orchestrator {
        Orchestrator::new(
            Capabilities {
                runtime: Arc::new(runtime.clone()),
                backups,
                metadata: Arc::new(LocalMetadata::new(self.layout.clone())),
                probe,
            },
            options,
        )
    }

    fn live_data(&self) -> String {
        std::fs::read_to_string(self.layout.data_file().path()).unwrap()
    }
}

fn labels(report: &DeploymentReport) -> Vec<&'static str> {
    report.history.iter().map(|s| s.label()).collect()
}

fn only_todo_on(image: &str) -> Vec<(String, FakeInstance)> {
    vec![(
        "todo".to_string(),
        FakeInstance {
            image: image.to_string(),
            running: true,
        },
    )]
}

#[tokio::test(start_paused = true)]
async fn test_fresh_environment_deploys_under_canonical_name() {
    let harness = Harness::new();
    let runtime = harness.runtime();
    let probe = Arc::new(ScriptedProbe::always(true).reporting_version("v1"));
    let orchestrator = harness.orchestrator(&runtime, harness.backups(), probe.clone(), options(1));

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V1, "v1"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(
        labels(&report),
        vec![
            "INIT",
            "BACKUP",
            "PULLING",
            "PROMOTING",
            "VERIFYING",
            "COMMITTING",
            "MONITORING",
            "DONE",
            "SUCCEEDED"
        ]
    );
    assert_eq!(report.backup, None);
    assert_eq!(report.health_attempts, Some(1));
    assert_eq!(report.reported_version.as_deref(), Some("v1"));
    assert_eq!(
        report.monitor,
        Some(MonitorReport::Stable {
            failures: 0,
            checks: 2
        })
    );
    assert_eq!(probe.probes(), 3);

    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V1));
    assert!(harness.journal.position("run todo").is_some());
    assert!(harness.journal.position("run todo-candidate").is_none());

    let metadata = LocalMetadata::new(harness.layout.clone())
        .load()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(metadata.version, "v1");

    assert!(report.into_result().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_upgrade_retires_previous_instance() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1);
    let probe = Arc::new(ScriptedProbe::always(true));
    let orchestrator = harness.orchestrator(&runtime, harness.backups(), probe, options(1));

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert!(report.backup.as_deref().unwrap().starts_with("app.db.backup."));
    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V2));
    assert!(harness.journal.position("run todo-candidate").is_some());
    assert!(harness.journal.position("rename todo-candidate todo").is_some());
    assert!(harness.journal.position("remove todo-previous").is_some());
    assert_eq!(harness.live_data(), "v1-data");
}

#[tokio::test(start_paused = true)]
async fn test_backup_precedes_every_mutation() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1);
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(true)),
        options(0),
    );

    orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    let journal = harness.journal.entries();
    assert_eq!(journal[0], "snapshot");
    assert_eq!(journal[1], format!("pull {}", V2));
    let first_mutation = journal
        .iter()
        .position(|e| {
            e.starts_with("run ")
                || e.starts_with("rename ")
                || e.starts_with("stop ")
                || e.starts_with("remove ")
        })
        .unwrap();
    assert!(first_mutation > 1);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_candidate_reinstates_previous() {
    let harness = Harness::new().with_live_data("v1-data");
    let data_file = harness.layout.data_file().path().to_path_buf();
    let runtime = harness
        .runtime()
        .with_instance("todo", V1)
        .writing_data_on_run(data_file, "v2-migrated");
    let probe = Arc::new(ScriptedProbe::always(false));
    let orchestrator = harness.orchestrator(&runtime, harness.backups(), probe.clone(), options(10));

    let started = Instant::now();
    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Five attempts, sleeping only between them
    assert_eq!(probe.probes(), 5);
    assert!(elapsed >= Duration::from_secs(8), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(10), "{:?}", elapsed);

    let cause = RollbackCause::Unhealthy { attempts: 5 };
    assert!(report
        .history
        .contains(&DeploymentState::RollingBack { cause: cause.clone() }));
    assert_eq!(
        report.final_state(),
        Some(&DeploymentState::Failed {
            failure: FailureKind::RolledBack { cause }
        })
    );
    assert!(report.monitor.is_none());
    assert!(harness.journal.position("logs todo-candidate").is_some());

    let summary = report.rollback.clone().unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.restored_backup, report.backup);

    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V1));
    assert_eq!(harness.live_data(), "v1-data");

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, DeployError::RolledBack(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_failures_roll_back_long_before_window_ends() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1);
    // Gate passes, three good checks, then the service falls over at minute 2
    let probe = Arc::new(ScriptedProbe::new([true, true, true, true], false));
    let orchestrator = harness.orchestrator(&runtime, harness.backups(), probe.clone(), options(15));

    let started = Instant::now();
    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(
        report.monitor,
        Some(MonitorReport::Unstable {
            failures: 3,
            checks: 6
        })
    );
    assert!(elapsed >= Duration::from_secs(180), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(181), "{:?}", elapsed);
    assert_eq!(probe.probes(), 7);

    assert_eq!(
        report.final_state(),
        Some(&DeploymentState::Failed {
            failure: FailureKind::RolledBack {
                cause: RollbackCause::Unstable {
                    failures: 3,
                    checks: 6
                }
            }
        })
    );
    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V1));
    assert_eq!(report.into_result().unwrap_err().exit_code(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pull_failure_touches_nothing() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1).failing("pull");
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(true)),
        options(10),
    );

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    assert_eq!(labels(&report), vec!["INIT", "BACKUP", "PULLING", "FAILED"]);
    assert_eq!(
        harness.journal.entries(),
        vec!["snapshot".to_string(), format!("pull {}", V2)]
    );
    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V1));

    let err = report.into_result().unwrap_err();
    assert!(err.is_before_mutation());
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_backup_failure_aborts_before_pull() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1);
    let orchestrator = harness.orchestrator(
        &runtime,
        Arc::new(BrokenBackups),
        Arc::new(ScriptedProbe::always(true)),
        options(10),
    );

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    assert_eq!(labels(&report), vec!["INIT", "BACKUP", "FAILED"]);
    assert!(harness.journal.entries().is_empty());
    assert_eq!(report.into_result().unwrap_err().exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_rename_aborts_without_tearing_down_active() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1).failing("rename");
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(true)),
        options(10),
    );

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    assert!(matches!(
        report.final_state(),
        Some(DeploymentState::Failed {
            failure: FailureKind::Aborted { .. }
        })
    ));
    assert!(report.rollback.is_none());
    assert!(harness.journal.position("run todo-candidate").is_none());
    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V1));
    assert_eq!(report.into_result().unwrap_err().exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_deployment_exhausts_rollback() {
    let harness = Harness::new();
    let runtime = harness.runtime();
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(false)),
        options(10),
    );

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V1, "v1"))
        .await
        .unwrap();

    assert!(matches!(
        report.final_state(),
        Some(DeploymentState::Failed {
            failure: FailureKind::RollbackExhausted { .. }
        })
    ));
    assert!(runtime.instances().is_empty());

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, DeployError::RollbackExhausted(_)));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_candidate_start_failure_rolls_back() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness.runtime().with_instance("todo", V1).failing("run");
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(true)),
        options(10),
    );

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    assert!(matches!(
        report.final_state(),
        Some(DeploymentState::Failed {
            failure: FailureKind::RolledBack {
                cause: RollbackCause::PromotionFailed { .. }
            }
        })
    ));
    assert!(report.healthy.is_none());
    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V1));
}

#[tokio::test(start_paused = true)]
async fn test_stale_leftovers_are_replaced() {
    let harness = Harness::new().with_live_data("v1-data");
    let runtime = harness
        .runtime()
        .with_instance("todo", V1)
        .with_instance("todo-candidate", "ghcr.io/acme/todo:v0")
        .with_instance("todo-previous", "ghcr.io/acme/todo:v0");
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(true)),
        options(0),
    );

    let report = orchestrator
        .deploy(&request(harness.dir.path(), V2, "v2"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(runtime.instances().into_iter().collect::<Vec<_>>(), only_todo_on(V2));
}

#[tokio::test]
async fn test_invalid_request_is_rejected_up_front() {
    let harness = Harness::new();
    let runtime = harness.runtime();
    let orchestrator = harness.orchestrator(
        &runtime,
        harness.backups(),
        Arc::new(ScriptedProbe::always(true)),
        options(0),
    );

    let mut bad = request(harness.dir.path(), V1, "v1");
    bad.name = "Not A Name".to_string();
    let err = orchestrator.deploy(&bad).await.unwrap_err();
    assert!(matches!(err, DeployError::ValidationError(_)));
    assert!(harness.journal.entries().is_empty());
}
