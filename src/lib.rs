//! CodeJudge - sandboxed code execution for an online judge
//!
//! Submitted programs are queued as jobs and executed by workers inside
//! single-use, resource-bounded Docker containers.
//!
//! # Architecture
//!
//! - **Services**: job submission and polling
//! - **Queue**: Redis Streams with delayed retries and a dead-letter stream
//! - **Worker**: dequeue loop and the per-job execution pipeline
//! - **Sandbox**: workspace provisioning, container supervision, output capture
//! - **Storage / DB**: blob store for payloads, Postgres for job records

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod sandbox;
pub mod services;
pub mod storage;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, AppResult};
