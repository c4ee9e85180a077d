//! Single-job execution pipeline
//!
//! `ExecutionWorker::handle` drives one queue message through the job
//! lifecycle: PROCESSING, blob fetch, sandbox run, persisted outcome and a
//! published result artifact. Program failure, timeouts and invalid requests
//! come back as `Ok`; only infrastructure faults are returned as errors so the
//! queue can retry them.

use std::sync::Arc;

use crate::{
    constants::TIMEOUT_ERROR_MESSAGE,
    db::JobStore,
    error::{AppError, AppResult},
    metrics::{self, GaugeGuard, ACTIVE_JOBS},
    models::{ExecutionResult, JobOutcome, JobStatus, QueueMessage, ResultArtifact},
    sandbox::{SandboxError, SandboxRunner},
    storage::{result_key, BlobStore},
};

/// How a delivery was settled; every variant means "acknowledge"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The program exited with code 0
    Completed(ExecutionResult),
    /// The program exited non-zero or was killed at the time limit
    Failed(ExecutionResult),
    /// The request could not be run at all (unsupported language, missing blob)
    Rejected(String),
    /// An earlier delivery already recorded a program outcome
    AlreadySettled(JobStatus),
    /// No job record matches the message
    Orphaned,
}

pub struct ExecutionWorker {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    runner: Arc<SandboxRunner>,
}

impl ExecutionWorker {
    pub fn new(jobs: Arc<dyn JobStore>, blobs: Arc<dyn BlobStore>, runner: Arc<SandboxRunner>) -> Self {
        Self { jobs, blobs, runner }
    }

    /// Process one delivery.
    ///
    /// On an infrastructure error the job is marked FAILED with the error
    /// message before the error is returned.
    pub async fn handle(&self, message: &QueueMessage) -> AppResult<HandleOutcome> {
        let job_id = message.job_id;

        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            tracing::warn!(job_id = %job_id, "No job record for queue message, skipping");
            return Ok(HandleOutcome::Orphaned);
        };

        if job.is_settled() {
            tracing::info!(
                job_id = %job_id,
                status = %job.status,
                "Job already settled, skipping redelivery"
            );
            // Re-publishing covers a crash between persisting and publishing
            self.publish(&ResultArtifact::from_job(&job)).await?;
            return Ok(HandleOutcome::AlreadySettled(job.status));
        }

        let outcome = {
            let _active = GaugeGuard::new(&ACTIVE_JOBS);
            self.attempt(message).await
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(
                    job_id = %job_id,
                    attempt = message.retry_count + 1,
                    error = %e,
                    "Job attempt failed"
                );
                if let Err(persist_err) = self
                    .jobs
                    .update_status(job_id, JobStatus::Failed, Some(JobOutcome::error(e.to_string())))
                    .await
                {
                    tracing::warn!(job_id = %job_id, error = %persist_err, "Could not record failure");
                }
                Err(e)
            }
        }
    }

    /// Record FAILED for a job whose deliveries kept dying before they could
    /// report back. A job that already holds an outcome is left untouched.
    pub async fn abandon(&self, message: &QueueMessage, reason: &str) -> AppResult<()> {
        let job_id = message.job_id;
        let Some(job) = self.jobs.find_by_id(job_id).await? else {
            return Ok(());
        };

        match job.status {
            JobStatus::Completed | JobStatus::Failed => return Ok(()),
            JobStatus::Queued => {
                self.jobs
                    .update_status(job_id, JobStatus::Processing, None)
                    .await?;
            }
            JobStatus::Processing => {}
        }

        tracing::error!(job_id = %job_id, reason = %reason, "Abandoning job");
        self.jobs
            .update_status(job_id, JobStatus::Failed, Some(JobOutcome::error(reason)))
            .await?;
        self.publish(&ResultArtifact::rejected(job_id, &message.language, reason))
            .await?;
        metrics::record_job(JobStatus::Failed.as_str());
        Ok(())
    }

    async fn attempt(&self, message: &QueueMessage) -> AppResult<HandleOutcome> {
        self.jobs
            .update_status(message.job_id, JobStatus::Processing, None)
            .await?;

        tracing::info!(
            job_id = %message.job_id,
            language = %message.language,
            attempt = message.retry_count + 1,
            "Processing job"
        );

        let source = match self.fetch(&message.source_key).await? {
            Ok(bytes) => bytes,
            Err(reason) => return self.reject(message, reason).await,
        };
        let input = match self.fetch(&message.input_key).await? {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(reason) => return self.reject(message, reason).await,
        };

        let file_name = message.source_file_name();
        match self.runner.run(&message.language, &source, file_name, &input).await {
            Ok(result) => self.finish(message, result).await,
            Err(SandboxError::ExecutionTimeout { partial, .. }) => {
                let mut result = *partial;
                result.error = if result.error.is_empty() {
                    TIMEOUT_ERROR_MESSAGE.to_string()
                } else {
                    format!("{}\n{}", TIMEOUT_ERROR_MESSAGE, result.error)
                };
                self.finish(message, result).await
            }
            Err(e) if e.is_business_failure() => self.reject(message, e.to_string()).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Outer error: infrastructure. Inner error: the object does not exist.
    async fn fetch(&self, key: &str) -> AppResult<Result<Vec<u8>, String>> {
        match self.blobs.fetch(key).await {
            Ok(bytes) => Ok(Ok(bytes)),
            Err(e) if e.is_not_found() => Ok(Err(e.to_string())),
            Err(e) => Err(AppError::from(e)),
        }
    }

    async fn finish(&self, message: &QueueMessage, result: ExecutionResult) -> AppResult<HandleOutcome> {
        let status = result.status();
        self.jobs
            .update_status(message.job_id, status, Some(JobOutcome::from(&result)))
            .await?;
        self.publish(&ResultArtifact::from_result(message.job_id, &message.language, &result))
            .await?;

        metrics::record_job(status.as_str());
        metrics::record_execution(&message.language, result.execution_time_ms, result.memory_used_bytes);

        tracing::info!(
            job_id = %message.job_id,
            status = %status,
            exit_code = result.exit_code,
            execution_time_ms = result.execution_time_ms,
            memory_used_bytes = result.memory_used_bytes,
            "Job finished"
        );

        Ok(match status {
            JobStatus::Completed => HandleOutcome::Completed(result),
            _ => HandleOutcome::Failed(result),
        })
    }

    async fn reject(&self, message: &QueueMessage, reason: String) -> AppResult<HandleOutcome> {
        tracing::warn!(job_id = %message.job_id, reason = %reason, "Job rejected");

        self.jobs
            .update_status(message.job_id, JobStatus::Failed, Some(JobOutcome::error(reason.clone())))
            .await?;
        self.publish(&ResultArtifact::rejected(message.job_id, &message.language, &reason))
            .await?;
        metrics::record_job(JobStatus::Failed.as_str());

        Ok(HandleOutcome::Rejected(reason))
    }

    async fn publish(&self, artifact: &ResultArtifact) -> AppResult<()> {
        let key = result_key(artifact.job_id);
        self.blobs.store(&key, artifact.to_json_bytes()?).await?;
        tracing::debug!(job_id = %artifact.job_id, key = %key, "Published result artifact");
        Ok(())
    }
}
