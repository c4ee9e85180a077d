//! Queue consumer loop
//!
//! Pulls deliveries and runs each one on its own task, with at most
//! `concurrency` jobs in flight. A handled delivery is acknowledged; a failed
//! one goes back to the queue's retry policy. While a job runs its delivery is
//! heartbeated so other consumers leave it alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::{
    constants::DEFAULT_CLAIM_IDLE_MS,
    error::AppResult,
    metrics::{DEAD_LETTERS, JOB_RETRIES},
    queue::{Delivery, JobQueue, RetryDecision},
};

use super::ExecutionWorker;

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    worker: Arc<ExecutionWorker>,
    concurrency: usize,
    heartbeat: Duration,
    shutdown: Arc<AtomicBool>,
}

impl JobConsumer {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        worker: Arc<ExecutionWorker>,
        concurrency: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            worker,
            concurrency: concurrency.max(1),
            heartbeat: Duration::from_millis(DEFAULT_CLAIM_IDLE_MS / 3),
            shutdown,
        }
    }

    /// Interval between heartbeats of an in-flight delivery; keep it well
    /// under the queue's reclaim idle time.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = interval.max(Duration::from_millis(1));
        self
    }

    /// Run until the shutdown flag is raised, then wait for in-flight jobs.
    pub async fn run(&self) -> AppResult<()> {
        tracing::info!(concurrency = self.concurrency, "Starting job consumer");

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        while !self.shutdown.load(Ordering::SeqCst) {
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Job task aborted");
                }
            }

            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.queue.next_delivery().await {
                Ok(Some(delivery)) => {
                    let queue = self.queue.clone();
                    let worker = self.worker.clone();
                    let heartbeat = self.heartbeat;
                    tasks.spawn(async move {
                        process(queue.as_ref(), &worker, delivery, heartbeat).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Error polling job queue");
                    // Brief pause on error to avoid tight loop
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "Shutdown requested, draining in-flight jobs");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Job task aborted");
            }
        }

        tracing::info!("Job consumer stopped");
        Ok(())
    }
}

async fn process(
    queue: &dyn JobQueue,
    worker: &ExecutionWorker,
    delivery: Delivery,
    heartbeat: Duration,
) {
    let job_id = delivery.message.job_id;

    if queue.exhausted(&delivery) {
        abandon(queue, worker, &delivery).await;
        return;
    }

    let handled = {
        let handle = worker.handle(&delivery.message);
        tokio::pin!(handle);

        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut handle => break result,
                _ = ticker.tick() => {
                    if let Err(e) = queue.touch(&delivery).await {
                        tracing::warn!(job_id = %job_id, error = %e, "Delivery heartbeat failed");
                    }
                }
            }
        }
    };

    match handled {
        Ok(outcome) => {
            tracing::debug!(job_id = %job_id, outcome = ?outcome, "Delivery handled");
            if let Err(e) = queue.ack(&delivery).await {
                tracing::error!(job_id = %job_id, error = %e, "Failed to acknowledge delivery");
            }
        }
        Err(err) => match queue.retry(&delivery, &err.to_string()).await {
            Ok(RetryDecision::Retry { retry_count, delay }) => {
                JOB_RETRIES.inc();
                tracing::warn!(
                    job_id = %job_id,
                    attempt = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Job scheduled for retry"
                );
            }
            Ok(RetryDecision::DeadLettered) => {
                DEAD_LETTERS.inc();
                tracing::error!(
                    job_id = %job_id,
                    attempts = delivery.message.retry_count + 1,
                    error = %err,
                    "Max retries exceeded, job dead-lettered"
                );
            }
            // Left pending; another consumer reclaims it after the idle timeout
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to schedule retry"),
        },
    }
}

/// Earlier holders of this delivery all died mid-job; running it again would
/// only repeat that, so the job is failed and the message retained.
async fn abandon(queue: &dyn JobQueue, worker: &ExecutionWorker, delivery: &Delivery) {
    let job_id = delivery.message.job_id;
    let reason = format!(
        "Job abandoned after {} deliveries without a result",
        delivery
            .message
            .retry_count
            .saturating_add(delivery.delivery_count)
            .saturating_sub(1)
    );

    if let Err(e) = worker.abandon(&delivery.message, &reason).await {
        tracing::warn!(job_id = %job_id, error = %e, "Could not record abandoned job");
    }

    match queue.dead_letter(delivery, &reason).await {
        Ok(()) => {
            DEAD_LETTERS.inc();
            tracing::error!(
                job_id = %job_id,
                delivery_count = delivery.delivery_count,
                "Redelivery limit reached, job dead-lettered"
            );
        }
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to dead-letter delivery"),
    }
}
