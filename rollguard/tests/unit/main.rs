//! rollguard integration tests

mod test_backup;
mod test_docker_runtime;
mod test_orchestrator;
