//! Job repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Job, JobOutcome, JobStatus, NewJob},
};

/// Persistence boundary for job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a job at `QUEUED`
    async fn create(&self, job: NewJob) -> AppResult<Job>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>>;

    /// All jobs, newest first
    async fn find_all(&self) -> AppResult<Vec<Job>>;

    /// Move a job along its lifecycle, replacing the stored outcome fields.
    ///
    /// Fails with `Validation` when the edge is not allowed by
    /// [`JobStatus::can_transition_to`], and `NotFound` for an unknown id.
    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> AppResult<Job>;
}

/// Postgres-backed job repository
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: NewJob) -> AppResult<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, source_key, input_key, language, status)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(&job.source_key)
        .bind(&job.input_key)
        .bind(job.language.as_str())
        .bind(JobStatus::Queued.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn find_all(&self) -> AppResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(r#"SELECT * FROM jobs ORDER BY created_at DESC"#)
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: JobStatus,
        outcome: Option<JobOutcome>,
    ) -> AppResult<Job> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar(r#"SELECT status FROM jobs WHERE id = $1 FOR UPDATE"#)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let current: JobStatus = current
            .ok_or_else(|| AppError::NotFound(format!("Job {}", id)))?
            .parse()
            .map_err(|e: crate::models::UnknownStatus| AppError::Database(e.to_string()))?;

        if !current.can_transition_to(status) {
            return Err(AppError::Validation(format!(
                "Job {} cannot move from {} to {}",
                id, current, status
            )));
        }

        let outcome = outcome.unwrap_or_default();
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET
                status = $2,
                output = $3,
                error = $4,
                exit_code = $5,
                execution_time_ms = $6,
                memory_used_bytes = $7,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(outcome.output)
        .bind(outcome.error)
        .bind(outcome.exit_code)
        .bind(outcome.execution_time_ms)
        .bind(outcome.memory_used_bytes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(job)
    }
}
