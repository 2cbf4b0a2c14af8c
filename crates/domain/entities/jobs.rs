use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde_json::Value;

use crate::{
    domain::value_objects::enums::{job_statuses::JobStatus, job_types::JobType},
    infra::db::postgres::schema::jobs,
};

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = jobs)]
pub struct JobEntity {
    pub id: uuid::Uuid,
    pub type_: String,
    pub status: String,
    pub payload: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct InsertJobEntity {
    pub type_: String,
    pub status: String,
    pub payload: Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InsertJobEntity {
    pub const DEFAULT_MAX_RETRIES: i32 = 3;

    /// A pending job whose first attempt is deferred by `delay`, carrying the
    /// error that caused it to be queued (if any).
    pub fn deferred(
        job_type: JobType,
        payload: Value,
        delay: Duration,
        error: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            type_: job_type.as_str().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            payload,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            next_attempt_at: now + delay,
            error,
            created_at: now,
            updated_at: now,
        }
    }
}
