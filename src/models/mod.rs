//! Domain models
//!
//! This module contains all domain models used throughout the worker.

pub mod execution;
pub mod job;
pub mod language;
pub mod queue_message;

pub use execution::*;
pub use job::*;
pub use language::*;
pub use queue_message::*;
