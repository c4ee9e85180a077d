//! Execution worker: the queue consumer side of the pipeline

pub mod consumer;
pub mod handler;

pub use consumer::JobConsumer;
pub use handler::{ExecutionWorker, HandleOutcome};
