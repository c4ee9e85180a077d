//! Durable job queue with bounded, backoff-based retry

pub mod redis_queue;
pub mod retry;

use std::time::Duration;

use async_trait::async_trait;

use crate::{error::AppResult, models::QueueMessage};

pub use redis_queue::RedisJobQueue;
pub use retry::RetryPolicy;

/// One delivery of a queue message; `id` is the queue's receipt for ack/retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: String,
    pub message: QueueMessage,
    /// Times this entry has been handed to a consumer, this one included.
    /// Above 1 means earlier holders died or stalled mid-job.
    pub delivery_count: u32,
}

/// What the queue did with a failed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Scheduled for redelivery after `delay`
    Retry { retry_count: u32, delay: Duration },
    /// Attempts exhausted; retained on the dead-letter stream
    DeadLettered,
}

/// At-least-once work queue between submission and execution
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job. Returns `false` when a message for the same job is
    /// already live and this one was dropped as a duplicate.
    async fn enqueue(&self, message: &QueueMessage) -> AppResult<bool>;

    /// Wait briefly for the next delivery; `None` when the queue is idle.
    async fn next_delivery(&self) -> AppResult<Option<Delivery>>;

    /// The handler finished; the message is done for good.
    async fn ack(&self, delivery: &Delivery) -> AppResult<()>;

    /// The handler failed; schedule a redelivery or dead-letter the message.
    async fn retry(&self, delivery: &Delivery, error: &str) -> AppResult<RetryDecision>;

    /// Retain the message on the dead-letter stream and settle the delivery.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> AppResult<()>;

    /// Keep an in-flight delivery from being reclaimed as stale.
    async fn touch(&self, delivery: &Delivery) -> AppResult<()>;

    /// Earlier deliveries already used up every attempt without settling.
    fn exhausted(&self, delivery: &Delivery) -> bool;
}
