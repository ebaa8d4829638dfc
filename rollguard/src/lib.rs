//! rollguard library
//!
//! Health-gated promotion of container instances with backup, monitoring
//! and automatic rollback.

pub mod app;
pub mod backup;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod logs;
pub mod models;
pub mod runtime;
pub mod storage;
pub mod utils;
