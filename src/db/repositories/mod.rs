//! Database repositories
//!
//! Repositories handle all direct database interactions.

pub mod job_repo;

pub use job_repo::{JobStore, PgJobStore};
