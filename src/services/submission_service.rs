//! Submission service
//!
//! The entry side of the pipeline: hands out upload handles, records new jobs
//! at QUEUED and enqueues them for the execution workers.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::JobStore,
    error::{AppError, AppResult},
    models::{Job, Language, NewJob, QueueMessage},
    queue::JobQueue,
    storage::{BlobStore, UploadHandle},
};

/// Submission service for business logic
pub struct SubmissionService {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    blobs: Arc<dyn BlobStore>,
}

impl SubmissionService {
    pub fn new(jobs: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { jobs, queue, blobs }
    }

    /// Issue a time-limited handle for uploading a source file or stdin fixture
    pub async fn upload_handle(&self, file_name: &str) -> AppResult<UploadHandle> {
        Ok(self.blobs.generate_upload_handle(file_name).await?)
    }

    /// Create a job for already uploaded blobs and enqueue it
    pub async fn submit(&self, source_key: &str, input_key: &str, language: &str) -> AppResult<Job> {
        let language: Language = language
            .parse()
            .map_err(|e: crate::models::UnsupportedLanguage| AppError::Validation(e.to_string()))?;

        if source_key.trim().is_empty() || input_key.trim().is_empty() {
            return Err(AppError::Validation(
                "sourceKey and inputKey are required".to_string(),
            ));
        }

        let job = self
            .jobs
            .create(NewJob {
                id: Uuid::new_v4(),
                source_key: source_key.to_string(),
                input_key: input_key.to_string(),
                language,
            })
            .await?;

        self.queue.enqueue(&QueueMessage::for_job(&job)).await?;

        tracing::info!(job_id = %job.id, language = %job.language, "Job submitted");

        Ok(job)
    }

    /// Get a job for polling
    pub async fn get_job(&self, id: Uuid) -> AppResult<Job> {
        self.jobs
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {}", id)))
    }

    /// List all jobs, newest first
    pub async fn list_jobs(&self) -> AppResult<Vec<Job>> {
        self.jobs.find_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;
    use crate::test_utils::{MemoryBlobStore, MemoryJobStore, MemoryQueue};

    fn service() -> (SubmissionService, Arc<MemoryJobStore>, Arc<MemoryQueue>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let queue = Arc::new(MemoryQueue::new(3));
        let service = SubmissionService::new(jobs.clone(), queue.clone(), Arc::new(MemoryBlobStore::new()));
        (service, jobs, queue)
    }

    #[tokio::test]
    async fn test_submit_creates_queued_job_and_enqueues() {
        let (service, jobs, queue) = service();

        let job = service
            .submit("sources/a/main.py", "inputs/b/input.txt", "Python")
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.language, Language::Python);
        assert_eq!(jobs.len(), 1);
        assert_eq!(queue.pending(), 1);

        let delivery = queue.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message.job_id, job.id);
        assert_eq!(delivery.message.language, "python");
        assert_eq!(delivery.message.retry_count, 0);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_language() {
        let (service, jobs, queue) = service();

        let err = service
            .submit("sources/a/main.cob", "inputs/b/input.txt", "cobol")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(jobs.len(), 0);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_polling() {
        let (service, _, _) = service();
        let first = service.submit("sources/a/main.c", "inputs/a/in.txt", "c").await.unwrap();
        service.submit("sources/b/main.js", "inputs/b/in.txt", "javascript").await.unwrap();

        assert_eq!(service.get_job(first.id).await.unwrap().id, first.id);
        assert_eq!(service.list_jobs().await.unwrap().len(), 2);
        assert!(matches!(
            service.get_job(Uuid::new_v4()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_handle() {
        let (service, _, _) = service();
        let handle = service.upload_handle("main.py").await.unwrap();
        assert!(handle.object_key.ends_with("/main.py"));
    }
}
