//! Execution results and published result artifacts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Job, JobStatus};

/// Captured output of one sandbox run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Captured standard output
    pub output: String,
    /// Captured standard error
    pub error: String,
    /// Exit status of the contained process
    pub exit_code: i32,
    /// Wall-clock duration of the contained process
    pub execution_time_ms: u64,
    /// Peak memory, zero when it could not be sampled
    pub memory_used_bytes: u64,
}

impl ExecutionResult {
    /// Status a job takes for this result: exit code 0 completes, anything else fails
    pub fn status(&self) -> JobStatus {
        if self.exit_code == 0 {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

/// Immutable JSON object published to the result bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultArtifact {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub output: String,
    pub error: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub memory_used_bytes: u64,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

impl ResultArtifact {
    /// Build the artifact for a finished run
    pub fn from_result(job_id: Uuid, language: &str, result: &ExecutionResult) -> Self {
        Self {
            job_id,
            status: result.status(),
            output: result.output.clone(),
            error: result.error.clone(),
            exit_code: Some(result.exit_code),
            execution_time_ms: result.execution_time_ms,
            memory_used_bytes: result.memory_used_bytes,
            language: language.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Rebuild the artifact of an already settled job from its record
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            output: job.output.clone().unwrap_or_default(),
            error: job.error.clone().unwrap_or_default(),
            exit_code: job.exit_code,
            execution_time_ms: job.execution_time_ms.map_or(0, |v| v.max(0) as u64),
            memory_used_bytes: job.memory_used_bytes.map_or(0, |v| v.max(0) as u64),
            language: job.language.to_string(),
            timestamp: job.updated_at,
        }
    }

    /// Artifact for a job turned away before anything ran
    pub fn rejected(job_id: Uuid, language: &str, error: &str) -> Self {
        Self {
            job_id,
            status: JobStatus::Failed,
            output: String::new(),
            error: error.to_string(),
            exit_code: None,
            execution_time_ms: 0,
            memory_used_bytes: 0,
            language: language.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Serialize to the bytes stored in the blob store
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}
