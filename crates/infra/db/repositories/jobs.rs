use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::{
        entities::jobs::{InsertJobEntity, JobEntity},
        repositories::jobs::JobRepository,
        value_objects::enums::job_statuses::JobStatus,
    },
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::jobs},
};

pub struct JobPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl JobPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl JobRepository for JobPostgres {
    async fn create_job(&self, insert_job_entity: InsertJobEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let job_id = diesel::insert_into(jobs::table)
            .values(&insert_job_entity)
            .returning(jobs::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(job_id)
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        stale_after: Duration,
    ) -> Result<Vec<JobEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let stale_cutoff = now - stale_after;

        // Claim by status transition inside one transaction so two
        // processors never pick the same job. Stale `processing` rows are
        // leftovers from a crashed processor and become claimable again.
        let claimed = conn.transaction::<Vec<JobEntity>, diesel::result::Error, _>(|conn| {
            let candidates: Vec<JobEntity> = jobs::table
                .select(JobEntity::as_select())
                .filter(
                    jobs::status
                        .eq(JobStatus::Pending.as_str())
                        .and(jobs::next_attempt_at.le(now))
                        .or(jobs::status
                            .eq(JobStatus::Processing.as_str())
                            .and(jobs::updated_at.lt(stale_cutoff))),
                )
                .order(jobs::next_attempt_at.asc())
                .limit(limit)
                .for_update()
                .skip_locked()
                .load::<JobEntity>(conn)?;

            let mut claimed = Vec::with_capacity(candidates.len());
            for job in candidates {
                let updated = diesel::update(jobs::table.find(job.id))
                    .set((
                        jobs::status.eq(JobStatus::Processing.as_str()),
                        jobs::updated_at.eq(now),
                    ))
                    .returning(JobEntity::as_select())
                    .get_result::<JobEntity>(conn)?;
                claimed.push(updated);
            }
            Ok(claimed)
        })?;

        Ok(claimed)
    }

    async fn mark_completed(&self, job_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(JobStatus::Completed.as_str()),
                jobs::completed_at.eq(Some(now)),
                jobs::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn reschedule(
        &self,
        job_id: Uuid,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(JobStatus::Pending.as_str()),
                jobs::retry_count.eq(retry_count),
                jobs::next_attempt_at.eq(next_attempt_at),
                jobs::error.eq(Some(error)),
                jobs::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(JobStatus::Failed.as_str()),
                jobs::error.eq(Some(error)),
                jobs::failed_at.eq(Some(now)),
                jobs::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let deleted = diesel::delete(
            jobs::table.filter(
                jobs::status
                    .eq_any([JobStatus::Completed.as_str(), JobStatus::Failed.as_str()])
                    .and(jobs::updated_at.lt(cutoff)),
            ),
        )
        .execute(&mut conn)?;

        Ok(deleted)
    }
}
