//! Queue message envelope

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Job;

/// Transient work item; the job record stays the source of truth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub job_id: Uuid,
    pub source_key: String,
    pub input_key: String,
    /// Kept as received; validated by the sandbox runner
    pub language: String,
    /// Number of failed deliveries before this one
    #[serde(default)]
    pub retry_count: u32,
}

impl QueueMessage {
    /// Build the first-delivery message for a job
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            source_key: job.source_key.clone(),
            input_key: job.input_key.clone(),
            language: job.language.to_string(),
            retry_count: 0,
        }
    }

    /// File name the source is written under: the last segment of the source key
    pub fn source_file_name(&self) -> &str {
        self.source_key
            .rsplit('/')
            .next()
            .unwrap_or(self.source_key.as_str())
    }

    /// Copy of this message for the next delivery attempt
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Flatten into stream entry fields
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("job_id", self.job_id.to_string()),
            ("source_key", self.source_key.clone()),
            ("input_key", self.input_key.clone()),
            ("language", self.language.clone()),
            ("retry_count", self.retry_count.to_string()),
        ]
    }

    /// Rebuild from stream entry fields; `None` when a required field is missing
    pub fn from_fields(data: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            job_id: data.get("job_id")?.parse().ok()?,
            source_key: data.get("source_key")?.clone(),
            input_key: data.get("input_key")?.clone(),
            language: data.get("language")?.clone(),
            retry_count: data
                .get("retry_count")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        })
    }
}
