//! In-memory stand-ins for the worker's collaborators

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    constants::INPUT_FILE_NAME,
    db::JobStore,
    error::{AppError, AppResult},
    models::{Job, JobOutcome, JobStatus, NewJob, QueueMessage},
    queue::{Delivery, JobQueue, RetryDecision, RetryPolicy},
    sandbox::{
        framing::{encode_frame, StreamKind},
        ContainerSpec, EngineError, SandboxEngine,
    },
    storage::{BlobStore, StorageError, UploadHandle},
};

// =============================================================================
// SANDBOX ENGINE
// =============================================================================

/// Scriptable container engine that records every lifecycle call
#[derive(Default)]
pub struct FakeEngine {
    exit_code: i64,
    logs: Vec<u8>,
    memory: Option<u64>,
    hang: bool,
    echo_input: bool,
    fail_create: bool,
    fail_start: bool,
    fail_logs: bool,
    fail_stats: bool,
    next_id: AtomicUsize,
    created: Mutex<Vec<ContainerSpec>>,
    workspace_files: Mutex<Vec<Vec<String>>>,
    inputs: Mutex<HashMap<String, Vec<u8>>>,
    live: Mutex<HashSet<String>>,
    killed: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    /// Raw framed log bytes returned by `logs`
    pub fn with_logs(mut self, logs: Vec<u8>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_stderr(mut self, text: &str) -> Self {
        encode_frame(StreamKind::Stderr, text.as_bytes(), &mut self.logs);
        self
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory = Some(bytes);
        self
    }

    /// Emit the workspace's stdin fixture on stdout, like `cat`
    pub fn echoing_input(mut self) -> Self {
        self.echo_input = true;
        self
    }

    /// `wait` never returns
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_logs(mut self) -> Self {
        self.fail_logs = true;
        self
    }

    pub fn failing_stats(mut self) -> Self {
        self.fail_stats = true;
        self
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    /// Sorted workspace listing observed at each `create`
    pub fn workspace_files(&self) -> Vec<Vec<String>> {
        self.workspace_files.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.killed.lock().unwrap().clone()
    }

    /// Containers created and not yet removed
    pub fn live_containers(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait]
impl SandboxEngine for FakeEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        if self.fail_create {
            return Err(EngineError("no such image".to_string()));
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));

        let mut files: Vec<String> = std::fs::read_dir(&spec.workspace)
            .map_err(|e| EngineError(e.to_string()))?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        self.workspace_files.lock().unwrap().push(files);

        let input = std::fs::read(spec.workspace.join(INPUT_FILE_NAME)).unwrap_or_default();
        self.inputs.lock().unwrap().insert(id.clone(), input);
        self.created.lock().unwrap().push(spec.clone());
        self.live.lock().unwrap().insert(id.clone());

        Ok(id)
    }

    async fn start(&self, _id: &str) -> Result<(), EngineError> {
        if self.fail_start {
            return Err(EngineError("cannot start container".to_string()));
        }
        Ok(())
    }

    async fn wait(&self, _id: &str) -> Result<i64, EngineError> {
        if self.hang {
            return futures::future::pending().await;
        }
        Ok(self.exit_code)
    }

    async fn kill(&self, id: &str) -> Result<(), EngineError> {
        self.killed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn logs(&self, id: &str, _limit: usize) -> Result<Vec<u8>, EngineError> {
        if self.fail_logs {
            return Err(EngineError("log stream closed".to_string()));
        }

        let mut logs = Vec::new();
        if self.echo_input {
            let input = self.inputs.lock().unwrap().get(id).cloned().unwrap_or_default();
            encode_frame(StreamKind::Stdout, &input, &mut logs);
        }
        logs.extend_from_slice(&self.logs);
        Ok(logs)
    }

    async fn peak_memory(&self, _id: &str) -> Result<Option<u64>, EngineError> {
        if self.fail_stats {
            return Err(EngineError("stats unavailable".to_string()));
        }
        Ok(self.memory)
    }

    async fn remove(&self, id: &str) -> Result<(), EngineError> {
        self.live.lock().unwrap().remove(id);
        Ok(())
    }
}

// =============================================================================
// JOB STORE
// =============================================================================

/// Job store that also keeps the sequence of statuses written per job
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    history: Mutex<Vec<(Uuid, JobStatus)>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses written for `id`, creation included
    pub fn history(&self, id: Uuid) -> Vec<JobStatus> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(job_id, _)| *job_id == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> AppResult<Job> {
        let now = Utc::now();
        let job = Job {
            id: job.id,
            source_key: job.source_key,
            input_key: job.input_key,
            language: job.language,
            status: JobStatus::Queued,
            output: None,
            error: None,
            exit_code: None,
            execution_time_ms: None,
            memory_used_bytes: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        self.history.lock().unwrap().push((job.id, JobStatus::Queued));
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        Ok(self.get(id))
    }

    async fn find_all(&self) -> AppResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> AppResult<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Job {}", id)))?;

        if !job.status.can_transition_to(status) {
            return Err(AppError::Validation(format!(
                "Job {} cannot move from {} to {}",
                id, job.status, status
            )));
        }

        let outcome = outcome.unwrap_or_default();
        let texts = [outcome.output.as_deref(), outcome.error.as_deref()];
        if texts.into_iter().flatten().any(|text| text.contains('\0')) {
            return Err(AppError::Database(
                "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
            ));
        }
        job.status = status;
        job.output = outcome.output;
        job.error = outcome.error;
        job.exit_code = outcome.exit_code;
        job.execution_time_ms = outcome.execution_time_ms;
        job.memory_used_bytes = outcome.memory_used_bytes;
        job.updated_at = Utc::now();

        self.history.lock().unwrap().push((id, status));
        Ok(job.clone())
    }
}

// =============================================================================
// BLOB STORE
// =============================================================================

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.to_string(), bytes.into());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn generate_upload_handle(&self, file_name: &str) -> Result<UploadHandle, StorageError> {
        let object_key = format!("sources/{}/{}", Uuid::new_v4(), file_name);
        Ok(UploadHandle {
            upload_url: format!("memory://{}", object_key),
            object_key,
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn store(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.insert(key, bytes);
        Ok(())
    }
}

// =============================================================================
// QUEUE
// =============================================================================

/// Queue that redelivers retries immediately and records every decision
pub struct MemoryQueue {
    policy: RetryPolicy,
    next_id: AtomicUsize,
    pending: Mutex<VecDeque<Delivery>>,
    live_jobs: Mutex<HashSet<Uuid>>,
    acked: Mutex<Vec<Delivery>>,
    retried: Mutex<Vec<(Delivery, RetryDecision)>>,
    dead: Mutex<Vec<(Delivery, String)>>,
    touched: Mutex<Vec<String>>,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            policy: RetryPolicy::new(max_attempts, Duration::from_millis(1)),
            next_id: AtomicUsize::new(1),
            pending: Mutex::new(VecDeque::new()),
            live_jobs: Mutex::new(HashSet::new()),
            acked: Mutex::new(Vec::new()),
            retried: Mutex::new(Vec::new()),
            dead: Mutex::new(Vec::new()),
            touched: Mutex::new(Vec::new()),
        }
    }

    fn push(&self, message: QueueMessage) {
        self.redeliver(message, 1);
    }

    /// Queue an entry as if earlier holders had taken it `delivery_count - 1`
    /// times and never reported back
    pub fn redeliver(&self, message: QueueMessage, delivery_count: u32) {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.live_jobs.lock().unwrap().insert(message.job_id);
        self.pending.lock().unwrap().push_back(Delivery {
            id,
            message,
            delivery_count,
        });
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn acked(&self) -> Vec<Delivery> {
        self.acked.lock().unwrap().clone()
    }

    pub fn retried(&self) -> Vec<(Delivery, RetryDecision)> {
        self.retried.lock().unwrap().clone()
    }

    /// Dead-lettered messages with the error recorded for each
    pub fn dead(&self) -> Vec<(Delivery, String)> {
        self.dead.lock().unwrap().clone()
    }

    pub fn dead_lettered(&self) -> usize {
        self.dead.lock().unwrap().len()
    }

    /// Receipt ids of every heartbeat
    pub fn touched(&self) -> Vec<String> {
        self.touched.lock().unwrap().clone()
    }

    fn bury(&self, delivery: &Delivery, error: &str) {
        self.live_jobs.lock().unwrap().remove(&delivery.message.job_id);
        self.dead
            .lock()
            .unwrap()
            .push((delivery.clone(), error.to_string()));
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, message: &QueueMessage) -> AppResult<bool> {
        if !self.live_jobs.lock().unwrap().insert(message.job_id) {
            return Ok(false);
        }
        self.push(message.clone());
        Ok(true)
    }

    async fn next_delivery(&self) -> AppResult<Option<Delivery>> {
        let next = self.pending.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(next)
    }

    async fn ack(&self, delivery: &Delivery) -> AppResult<()> {
        self.live_jobs.lock().unwrap().remove(&delivery.message.job_id);
        self.acked.lock().unwrap().push(delivery.clone());
        Ok(())
    }

    async fn retry(&self, delivery: &Delivery, error: &str) -> AppResult<RetryDecision> {
        let decision = match self.policy.next_delay(delivery.message.retry_count) {
            Some(delay) => {
                let next = delivery.message.next_attempt();
                let retry_count = next.retry_count;
                self.push(next);
                RetryDecision::Retry { retry_count, delay }
            }
            None => {
                self.bury(delivery, error);
                RetryDecision::DeadLettered
            }
        };
        self.retried.lock().unwrap().push((delivery.clone(), decision));
        Ok(decision)
    }

    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> AppResult<()> {
        self.bury(delivery, error);
        Ok(())
    }

    async fn touch(&self, delivery: &Delivery) -> AppResult<()> {
        self.touched.lock().unwrap().push(delivery.id.clone());
        Ok(())
    }

    fn exhausted(&self, delivery: &Delivery) -> bool {
        self.policy
            .is_exhausted(delivery.message.retry_count, delivery.delivery_count)
    }
}
