//! Deployment orchestration, rollback and cleanup

pub mod cleanup;
pub mod fsm;
pub mod orchestrator;
pub mod rollback;
