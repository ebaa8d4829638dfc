//! Deployment data model

pub mod deployment;
pub mod instance;
