//! Blob storage for sources, stdin fixtures and result artifacts

pub mod fs;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::constants::buckets;

pub use fs::FsBlobStore;

/// Time-limited handle a client uses to upload one object directly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHandle {
    pub upload_url: String,
    pub object_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Key under which the result artifact of `job_id` is published
pub fn result_key(job_id: Uuid) -> String {
    format!("{}/{}.json", buckets::RESULTS, job_id)
}

/// Blob storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// A missing object is the client's fault; everything else is infrastructure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Object storage addressed by opaque keys
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Issue an upload handle; `.txt` files land in the inputs bucket,
    /// everything else in the sources bucket.
    async fn generate_upload_handle(&self, file_name: &str) -> Result<UploadHandle, StorageError>;

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;
}
