use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::jobs::{InsertJobEntity, JobEntity};

#[async_trait]
#[automock]
pub trait JobRepository {
    async fn create_job(&self, insert_job_entity: InsertJobEntity) -> Result<Uuid>;

    /// Claims up to `limit` due jobs by flipping them pending -> processing
    /// inside one transaction. Also reclaims jobs stuck in `processing`
    /// longer than `stale_after` (a processor that crashed between claim and
    /// completion must not strand its jobs forever).
    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        stale_after: Duration,
    ) -> Result<Vec<JobEntity>>;

    async fn mark_completed(&self, job_id: Uuid) -> Result<()>;

    /// Puts the job back to `pending` with an incremented retry count and a
    /// new attempt time, recording the error that caused the retry.
    async fn reschedule(
        &self,
        job_id: Uuid,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> Result<()>;

    /// Terminal. Failed jobs are kept for operator inspection until the
    /// retention pass deletes them.
    async fn mark_failed(&self, job_id: Uuid, error: String) -> Result<()>;

    /// Deletes completed/failed jobs older than `cutoff` (30-day retention).
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
