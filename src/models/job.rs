//! Job model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{ExecutionResult, Language};

/// Job database model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub source_key: String,
    pub input_key: String,
    #[sqlx(try_from = "String")]
    pub language: Language,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<i64>,
    pub memory_used_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A terminal program outcome has been recorded, so re-running the
    /// sandbox for this job would only repeat it.
    pub fn is_settled(&self) -> bool {
        match self.status {
            JobStatus::Completed => true,
            JobStatus::Failed => self.exit_code.is_some(),
            JobStatus::Queued | JobStatus::Processing => false,
        }
    }
}

/// Fields required to create a job record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub id: Uuid,
    pub source_key: String,
    pub input_key: String,
    pub language: Language,
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in queue
    Queued,
    /// Picked up by a worker
    Processing,
    /// Program exited with code 0
    Completed,
    /// Program failed or the attempt hit an infrastructure error
    Failed,
}

/// A status label outside the lifecycle enumeration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl JobStatus {
    /// Get status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Allowed lifecycle edges.
    ///
    /// `Processing -> Processing` happens when a crashed attempt is redelivered;
    /// `Failed -> Processing` when the queue retries an infrastructure failure.
    /// Nothing leaves `Completed`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Processing)
        )
    }
}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

impl TryFrom<String> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result fields written alongside a status update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutcome {
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<i64>,
    pub memory_used_bytes: Option<i64>,
}

impl JobOutcome {
    /// Outcome carrying only an error message (no program ran to completion)
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(storable_text(&message.into())),
            ..Default::default()
        }
    }
}

impl From<&ExecutionResult> for JobOutcome {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            output: Some(storable_text(&result.output)),
            error: Some(storable_text(&result.error)),
            exit_code: Some(result.exit_code),
            execution_time_ms: Some(saturating_i64(result.execution_time_ms)),
            memory_used_bytes: Some(saturating_i64(result.memory_used_bytes)),
        }
    }
}

/// Text columns reject NUL, which programs are free to print
fn storable_text(text: &str) -> String {
    text.replace('\0', "\u{FFFD}")
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
