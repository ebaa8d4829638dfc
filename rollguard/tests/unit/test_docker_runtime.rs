//! The real docker runtime against a shell-script stand-in for the docker CLI

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use rollguard::app::options::AppOptions;
use rollguard::app::run::run_rollback;
use rollguard::deploy::cleanup::cleanup;
use rollguard::errors::DeployError;
use rollguard::models::deployment::{PortMapping, PromotionMode};
use rollguard::models::instance::{InstanceSpec, InstanceStatus};
use rollguard::runtime::docker::DockerRuntime;
use rollguard::runtime::transport::Transport;
use rollguard::runtime::Runtime;

/// Containers are files under `<state>/c`, holding their status. Every call
/// is appended to `<state>/calls.log`.
const FAKE_DOCKER: &str = r#"#!/bin/sh
STATE="__STATE__"
echo "$*" >> "$STATE/calls.log"
cmd="$1"
shift
case "$cmd" in
  pull)
    case "$1" in
      *missing*) echo "manifest unknown" >&2; exit 1 ;;
    esac
    ;;
  run)
    name=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --name) name="$2"; shift 2 ;;
        *) shift ;;
      esac
    done
    if [ -e "$STATE/c/$name" ]; then echo "Conflict: $name is in use" >&2; exit 125; fi
    echo running > "$STATE/c/$name"
    ;;
  start)
    [ -e "$STATE/c/$1" ] || { echo "No such container: $1" >&2; exit 1; }
    echo running > "$STATE/c/$1"
    ;;
  stop)
    [ -e "$STATE/c/$1" ] || { echo "No such container: $1" >&2; exit 1; }
    echo exited > "$STATE/c/$1"
    ;;
  rename)
    [ -e "$STATE/c/$1" ] || { echo "No such container: $1" >&2; exit 1; }
    [ -e "$STATE/c/$2" ] && { echo "Conflict: $2 is in use" >&2; exit 1; }
    mv "$STATE/c/$1" "$STATE/c/$2"
    ;;
  rm)
    shift
    [ -e "$STATE/c/$1" ] || { echo "No such container: $1" >&2; exit 1; }
    rm "$STATE/c/$1"
    ;;
  ps)
    ls "$STATE/c"
    ;;
  inspect)
    cat "$STATE/c/$3"
    ;;
  logs)
    echo "listening on :3000"
    echo "fatal: database is locked" >&2
    ;;
  image)
    echo "Total reclaimed space: 0B"
    ;;
  *)
    echo "unknown command $cmd" >&2
    exit 2
    ;;
esac
"#;

struct FakeDocker {
    dir: tempfile::TempDir,
    bin: PathBuf,
}

impl FakeDocker {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("c")).unwrap();
        let bin = dir.path().join("docker");
        let script = FAKE_DOCKER.replace("__STATE__", &dir.path().display().to_string());
        std::fs::write(&bin, script).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, bin }
    }

    fn with_container(self, name: &str, status: &str) -> Self {
        std::fs::write(self.dir.path().join("c").join(name), format!("{}\n", status)).unwrap();
        self
    }

    fn runtime(&self) -> DockerRuntime {
        DockerRuntime::new(Transport::Local, self.bin.display().to_string())
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn containers(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.dir.path().join("c"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}

fn spec(name: &str) -> InstanceSpec {
    InstanceSpec {
        name: name.to_string(),
        image: "ghcr.io/acme/todo:v2".to_string(),
        ports: vec![PortMapping {
            host: 8080,
            container: 3000,
        }],
        volumes: Vec::new(),
        env: vec![("NODE_ENV".to_string(), "production".to_string())],
    }
}

#[tokio::test]
async fn test_teardown_of_missing_instance_is_a_no_op() {
    let docker = FakeDocker::new();
    let runtime = docker.runtime();

    for _ in 0..2 {
        runtime.stop("ghost").await.unwrap();
        runtime.remove("ghost").await.unwrap();
    }

    assert!(docker
        .calls()
        .iter()
        .all(|call| call.starts_with("ps ")), "{:?}", docker.calls());
}

#[tokio::test]
async fn test_instance_lifecycle() {
    let docker = FakeDocker::new();
    let runtime = docker.runtime();

    runtime.run(&spec("todo-candidate")).await.unwrap();
    assert!(runtime.exists("todo-candidate").await.unwrap());
    assert!(!runtime.exists("todo").await.unwrap());
    assert_eq!(runtime.status("todo-candidate").await.unwrap(), InstanceStatus::Running);

    runtime.stop("todo-candidate").await.unwrap();
    assert_eq!(runtime.status("todo-candidate").await.unwrap(), InstanceStatus::Exited);

    runtime.rename("todo-candidate", "todo").await.unwrap();
    runtime.start("todo").await.unwrap();
    assert_eq!(docker.containers(), vec!["todo".to_string()]);
    assert_eq!(runtime.status("todo").await.unwrap(), InstanceStatus::Running);

    runtime.remove("todo").await.unwrap();
    runtime.remove("todo").await.unwrap();
    assert!(docker.containers().is_empty());
    assert_eq!(runtime.status("todo").await.unwrap(), InstanceStatus::Missing);

    let run_call = docker
        .calls()
        .into_iter()
        .find(|c| c.starts_with("run "))
        .unwrap();
    assert_eq!(
        run_call,
        "run -d --name todo-candidate --restart unless-stopped -p 8080:3000 \
         -e NODE_ENV=production ghcr.io/acme/todo:v2"
    );
}

#[tokio::test]
async fn test_exists_matches_whole_names_only() {
    let docker = FakeDocker::new().with_container("todo-previous", "exited");
    let runtime = docker.runtime();

    assert!(runtime.exists("todo-previous").await.unwrap());
    assert!(!runtime.exists("todo").await.unwrap());
}

#[tokio::test]
async fn test_pull_failure_is_a_pull_error() {
    let docker = FakeDocker::new();
    let runtime = docker.runtime();

    runtime.pull("ghcr.io/acme/todo:v2").await.unwrap();
    let err = runtime.pull("ghcr.io/acme/missing:v9").await.unwrap_err();
    match err {
        DeployError::PullError(message) => assert!(message.contains("manifest unknown"), "{}", message),
        other => panic!("expected pull error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_rename_onto_existing_name_fails() {
    let docker = FakeDocker::new()
        .with_container("todo", "running")
        .with_container("todo-candidate", "running");
    let err = docker
        .runtime()
        .rename("todo-candidate", "todo")
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::RuntimeError(_)));
    assert_eq!(docker.containers(), vec!["todo", "todo-candidate"]);
}

#[tokio::test]
async fn test_logs_include_stderr() {
    let docker = FakeDocker::new().with_container("todo-candidate", "exited");
    let logs = docker.runtime().logs("todo-candidate", 20).await.unwrap();
    assert!(logs.contains("listening on :3000"));
    assert!(logs.contains("database is locked"));
    assert!(docker.calls().contains(&"logs --tail 20 todo-candidate".to_string()));
}

#[tokio::test]
async fn test_missing_binary_is_a_command_error() {
    let runtime = DockerRuntime::new(Transport::Local, "/nonexistent/rollguard-docker");
    assert!(matches!(
        runtime.exists("todo").await,
        Err(DeployError::CommandError(_))
    ));
}

#[tokio::test]
async fn test_cleanup_removes_leftovers_but_not_canonical() {
    let docker = FakeDocker::new()
        .with_container("todo", "running")
        .with_container("todo-candidate", "exited")
        .with_container("todo-previous", "exited");

    let report = cleanup(&docker.runtime(), "todo", true).await;

    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.removed, vec!["todo-candidate", "todo-previous"]);
    assert!(report.images_pruned);
    assert_eq!(docker.containers(), vec!["todo"]);
    assert!(docker.calls().contains(&"image prune -f".to_string()));
}

fn options_for(docker: &FakeDocker) -> AppOptions {
    AppOptions {
        docker_bin: docker.bin.display().to_string(),
        ..Default::default()
    }
}

fn seed_data(deploy_path: &Path, live: &str, backup: &str) {
    let data = deploy_path.join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("app.db"), live).unwrap();
    std::fs::write(data.join("app.db.backup.20260101_120000_000"), backup).unwrap();
}

#[tokio::test]
async fn test_manual_rollback_refuses_without_previous() {
    let docker = FakeDocker::new().with_container("todo", "running");
    let deploy = tempfile::tempdir().unwrap();
    seed_data(deploy.path(), "live", "older");

    let err = run_rollback(
        &options_for(&docker),
        "todo",
        deploy.path(),
        &PromotionMode::Container,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, DeployError::RollbackExhausted(_)));
    assert_eq!(err.exit_code(), 3);
    // Nothing was torn down or restored
    assert_eq!(docker.containers(), vec!["todo"]);
    assert!(docker.calls().iter().all(|c| c.starts_with("ps ")));
    assert_eq!(
        std::fs::read_to_string(deploy.path().join("data/app.db")).unwrap(),
        "live"
    );
}

#[tokio::test]
async fn test_manual_rollback_reinstates_previous() {
    let docker = FakeDocker::new()
        .with_container("todo", "running")
        .with_container("todo-previous", "exited");
    let deploy = tempfile::tempdir().unwrap();
    seed_data(deploy.path(), "migrated", "before");

    let summary = run_rollback(
        &options_for(&docker),
        "todo",
        deploy.path(),
        &PromotionMode::Container,
    )
    .await
    .unwrap();

    assert!(summary.is_clean(), "{:?}", summary);
    assert_eq!(
        summary.restored_backup.as_deref(),
        Some("app.db.backup.20260101_120000_000")
    );
    assert_eq!(docker.containers(), vec!["todo"]);
    assert_eq!(
        std::fs::read_to_string(docker.dir.path().join("c/todo")).unwrap().trim(),
        "running"
    );
    assert_eq!(
        std::fs::read_to_string(deploy.path().join("data/app.db")).unwrap(),
        "before"
    );
}
