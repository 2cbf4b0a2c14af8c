use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use backend::usecases::{
    billing_webhooks::WebhookUseCase,
    gateway::BillingGateway,
    subscription_sync::SubscriptionSyncUseCase,
};
use chrono::{Duration, Utc};
use crates::{
    domain::{
        entities::jobs::JobEntity,
        repositories::{
            jobs::JobRepository, payments::PaymentRepository, sync::SubscriptionSyncRepository,
            users::UserRepository, webhooks::BillingWebhookRepository,
        },
        value_objects::{
            enums::{job_types::JobType, payment_statuses::PaymentStatus},
            jobs::{
                CustomerCreatePayload, PaymentVerifyPayload, RefundProcessPayload,
                SubscriptionFetchPayload, SubscriptionSyncPayload, WebhookRetryPayload,
            },
            sync::SyncResult,
            webhooks::WebhookOutcome,
        },
    },
    payments::razorpay_client::BillingEvent,
    reliability::{
        circuit_breaker::CircuitBreaker,
        retry::{RetryConfig, backoff_delay},
    },
};
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Upper bound on jobs claimed per tick so one tick never does unbounded work.
pub const BATCH_LIMIT: i64 = 10;

/// A job stuck in `processing` this long is treated as orphaned by a crashed
/// processor and becomes claimable again.
const STALE_PROCESSING_MINUTES: i64 = 10;

fn job_backoff_config() -> RetryConfig {
    RetryConfig {
        max_retries: 0, // retries are counted on the job row, not here
        base_delay: StdDuration::from_millis(1000),
        max_delay: StdDuration::from_millis(300_000),
        jitter: true,
    }
}

/// Replays a stored webhook event through the idempotent apply path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebhookReplayer: Send + Sync {
    async fn replay(&self, event: BillingEvent) -> Result<WebhookOutcome>;
}

#[async_trait]
impl<W, J, G> WebhookReplayer for WebhookUseCase<W, J, G>
where
    W: BillingWebhookRepository + Send + Sync + 'static,
    J: JobRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    async fn replay(&self, event: BillingEvent) -> Result<WebhookOutcome> {
        self.replay_webhook(event).await.map_err(anyhow::Error::from)
    }
}

/// Reconciliation entry points the queue and the scheduler dispatch into.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionSyncer: Send + Sync {
    async fn run_full_sync(&self) -> Result<SyncResult>;

    async fn sync_one(&self, subscription_id: Uuid) -> Result<()>;

    async fn sync_by_provider_id(&self, provider_subscription_id: String) -> Result<()>;
}

#[async_trait]
impl<R, J, G> SubscriptionSyncer for SubscriptionSyncUseCase<R, J, G>
where
    R: SubscriptionSyncRepository + Send + Sync + 'static,
    J: JobRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    async fn run_full_sync(&self) -> Result<SyncResult> {
        self.sync_subscriptions().await.map_err(anyhow::Error::from)
    }

    async fn sync_one(&self, subscription_id: Uuid) -> Result<()> {
        SubscriptionSyncUseCase::sync_one(self, subscription_id)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn sync_by_provider_id(&self, provider_subscription_id: String) -> Result<()> {
        SubscriptionSyncUseCase::sync_by_provider_id(self, provider_subscription_id)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(())
    }
}

/// What the scheduler and the ops drain endpoint call each tick.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PendingJobProcessor: Send + Sync {
    async fn process_pending_jobs(&self) -> Result<usize>;
}

pub struct JobRunner {
    job_repo: Arc<dyn JobRepository + Send + Sync>,
    payment_repo: Arc<dyn PaymentRepository + Send + Sync>,
    user_repo: Arc<dyn UserRepository + Send + Sync>,
    gateway: Arc<dyn BillingGateway>,
    breaker: Arc<CircuitBreaker>,
    webhook_replayer: Arc<dyn WebhookReplayer>,
    syncer: Arc<dyn SubscriptionSyncer>,
}

impl JobRunner {
    pub fn new(
        job_repo: Arc<dyn JobRepository + Send + Sync>,
        payment_repo: Arc<dyn PaymentRepository + Send + Sync>,
        user_repo: Arc<dyn UserRepository + Send + Sync>,
        gateway: Arc<dyn BillingGateway>,
        breaker: Arc<CircuitBreaker>,
        webhook_replayer: Arc<dyn WebhookReplayer>,
        syncer: Arc<dyn SubscriptionSyncer>,
    ) -> Self {
        Self {
            job_repo,
            payment_repo,
            user_repo,
            gateway,
            breaker,
            webhook_replayer,
            syncer,
        }
    }

    /// Processes one job to a terminal or rescheduled state. Nothing this
    /// does is allowed to propagate: one bad job must not poison the batch.
    async fn process_job(&self, job: JobEntity) {
        let job_id = job.id;
        let job_type_raw = job.type_.clone();

        let Some(job_type) = JobType::from_str(&job_type_raw) else {
            // A defect, not a transient fault. Never retried.
            warn!(%job_id, job_type = %job_type_raw, "jobs: unknown job type, failing permanently");
            self.finish_failed(job_id, format!("unknown job type: {job_type_raw}"))
                .await;
            return;
        };

        match self.execute(job_type, &job).await {
            Ok(()) => {
                info!(%job_id, job_type = %job_type, "jobs: completed");
                if let Err(err) = self.job_repo.mark_completed(job_id).await {
                    error!(%job_id, db_error = ?err, "jobs: failed to mark completed");
                }
            }
            Err(JobFailure::Permanent(message)) => {
                warn!(%job_id, job_type = %job_type, error = %message, "jobs: permanent failure");
                self.finish_failed(job_id, message).await;
            }
            Err(JobFailure::Transient(err)) => {
                let new_retry_count = job.retry_count + 1;
                if new_retry_count <= job.max_retries {
                    let delay = backoff_delay(new_retry_count as u32, &job_backoff_config());
                    let next_attempt_at = Utc::now()
                        + Duration::from_std(delay).unwrap_or_else(|_| Duration::seconds(300));

                    info!(
                        %job_id,
                        job_type = %job_type,
                        retry_count = new_retry_count,
                        max_retries = job.max_retries,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "jobs: rescheduling"
                    );

                    if let Err(db_err) = self
                        .job_repo
                        .reschedule(job_id, new_retry_count, next_attempt_at, err.to_string())
                        .await
                    {
                        error!(%job_id, db_error = ?db_err, "jobs: failed to reschedule");
                    }
                } else {
                    error!(
                        %job_id,
                        job_type = %job_type,
                        retry_count = job.retry_count,
                        error = %err,
                        "jobs: retries exhausted, failing permanently"
                    );
                    self.finish_failed(job_id, err.to_string()).await;
                }
            }
        }
    }

    async fn finish_failed(&self, job_id: Uuid, message: String) {
        if let Err(err) = self.job_repo.mark_failed(job_id, message).await {
            error!(%job_id, db_error = ?err, "jobs: failed to mark failed");
        }
    }

    async fn execute(&self, job_type: JobType, job: &JobEntity) -> Result<(), JobFailure> {
        match job_type {
            JobType::SubscriptionSync => {
                let payload: SubscriptionSyncPayload = decode_payload(job)?;
                self.syncer
                    .sync_one(payload.subscription_id)
                    .await
                    .map_err(JobFailure::Transient)
            }
            JobType::SubscriptionFetch => {
                let payload: SubscriptionFetchPayload = decode_payload(job)?;
                self.syncer
                    .sync_by_provider_id(payload.provider_subscription_id)
                    .await
                    .map_err(JobFailure::Transient)
            }
            JobType::PaymentVerify => {
                let payload: PaymentVerifyPayload = decode_payload(job)?;
                self.verify_payment(payload).await
            }
            JobType::WebhookRetry => {
                let payload: WebhookRetryPayload = decode_payload(job)?;
                let event: BillingEvent = serde_json::from_value(payload.event).map_err(|err| {
                    JobFailure::Permanent(format!("stored webhook event does not decode: {err}"))
                })?;
                self.webhook_replayer
                    .replay(event)
                    .await
                    .map(|_| ())
                    .map_err(JobFailure::Transient)
            }
            JobType::CustomerCreate => {
                let payload: CustomerCreatePayload = decode_payload(job)?;
                self.create_customer(payload).await
            }
            JobType::RefundProcess => {
                let payload: RefundProcessPayload = decode_payload(job)?;
                self.process_refund(payload).await
            }
        }
    }

    async fn verify_payment(&self, payload: PaymentVerifyPayload) -> Result<(), JobFailure> {
        let gateway = Arc::clone(&self.gateway);
        let payment_id = payload.provider_payment_id.clone();
        let fetched = self
            .breaker
            .execute(|| async move { gateway.fetch_payment(&payment_id).await })
            .await
            .map_err(JobFailure::Transient)?;

        let status = PaymentStatus::from_str(&fetched.status).ok_or_else(|| {
            JobFailure::Permanent(format!("unknown provider payment status: {}", fetched.status))
        })?;

        self.payment_repo
            .update_status_by_provider_payment_id(payload.provider_payment_id, status)
            .await
            .map_err(JobFailure::Transient)
    }

    async fn create_customer(&self, payload: CustomerCreatePayload) -> Result<(), JobFailure> {
        let user = self
            .user_repo
            .find_by_id(payload.user_id)
            .await
            .map_err(JobFailure::Transient)?
            .ok_or_else(|| {
                JobFailure::Permanent(format!("user {} does not exist", payload.user_id))
            })?;

        if user.provider_customer_id.is_some() {
            // Already linked, nothing to do.
            return Ok(());
        }

        let gateway = Arc::clone(&self.gateway);
        let email = payload.email.clone();
        let customer_id = self
            .breaker
            .execute(|| async move { gateway.create_customer(&email, None).await })
            .await
            .map_err(JobFailure::Transient)?;

        self.user_repo
            .set_provider_customer_id(payload.user_id, customer_id)
            .await
            .map_err(JobFailure::Transient)
    }

    async fn process_refund(&self, payload: RefundProcessPayload) -> Result<(), JobFailure> {
        let gateway = Arc::clone(&self.gateway);
        let payment_id = payload.provider_payment_id.clone();
        let amount = payload.amount;
        let reason = payload.reason.clone();
        let refund = self
            .breaker
            .execute(|| async move {
                gateway
                    .create_refund(&payment_id, amount, reason.as_deref())
                    .await
            })
            .await
            .map_err(JobFailure::Transient)?;

        self.payment_repo
            .apply_refund(
                payload.provider_payment_id,
                refund.amount,
                payload.reason,
                Utc::now(),
            )
            .await
            .map(|_| ())
            .map_err(JobFailure::Transient)
    }
}

#[async_trait]
impl PendingJobProcessor for JobRunner {
    /// One tick: claim a bounded batch of due jobs (including stale
    /// `processing` orphans) and run each to completion, reschedule, or
    /// permanent failure.
    async fn process_pending_jobs(&self) -> Result<usize> {
        let jobs = self
            .job_repo
            .claim_due_jobs(
                Utc::now(),
                BATCH_LIMIT,
                Duration::minutes(STALE_PROCESSING_MINUTES),
            )
            .await?;

        if jobs.is_empty() {
            return Ok(0);
        }

        let claimed = jobs.len();
        info!(claimed, "jobs: batch claimed");

        for job in jobs {
            self.process_job(job).await;
        }

        Ok(claimed)
    }
}

enum JobFailure {
    /// Worth another attempt, counted against the job's max_retries.
    Transient(anyhow::Error),
    /// A defect (unknown type, undecodable payload, impossible state).
    /// Marked failed immediately.
    Permanent(String),
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Transient(err) => write!(f, "{err}"),
            JobFailure::Permanent(message) => write!(f, "{message}"),
        }
    }
}

fn decode_payload<T: DeserializeOwned>(job: &JobEntity) -> Result<T, JobFailure> {
    serde_json::from_value(job.payload.clone()).map_err(|err| {
        JobFailure::Permanent(format!(
            "payload for {} job does not decode: {err}",
            job.type_
        ))
    })
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use backend::usecases::gateway::MockBillingGateway;
    use crates::domain::repositories::{
        jobs::MockJobRepository, payments::MockPaymentRepository, users::MockUserRepository,
    };
    use crates::payments::razorpay_client::RazorpayRefund;
    use crates::reliability::circuit_breaker::CircuitBreakerConfig;
    use serde_json::json;

    use super::*;

    fn job(job_type: &str, payload: serde_json::Value, retry_count: i32, max_retries: i32) -> JobEntity {
        let now = Utc::now();
        JobEntity {
            id: Uuid::new_v4(),
            type_: job_type.to_string(),
            status: "processing".to_string(),
            payload,
            retry_count,
            max_retries,
            next_attempt_at: now,
            error: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    struct RunnerParts {
        job_repo: MockJobRepository,
        payment_repo: MockPaymentRepository,
        user_repo: MockUserRepository,
        gateway: MockBillingGateway,
        replayer: MockWebhookReplayer,
        syncer: MockSubscriptionSyncer,
    }

    impl RunnerParts {
        fn new() -> Self {
            Self {
                job_repo: MockJobRepository::new(),
                payment_repo: MockPaymentRepository::new(),
                user_repo: MockUserRepository::new(),
                gateway: MockBillingGateway::new(),
                replayer: MockWebhookReplayer::new(),
                syncer: MockSubscriptionSyncer::new(),
            }
        }

        fn build(self) -> JobRunner {
            JobRunner::new(
                Arc::new(self.job_repo),
                Arc::new(self.payment_repo),
                Arc::new(self.user_repo),
                Arc::new(self.gateway),
                Arc::new(CircuitBreaker::new(
                    "razorpay",
                    CircuitBreakerConfig::default(),
                )),
                Arc::new(self.replayer),
                Arc::new(self.syncer),
            )
        }
    }

    #[tokio::test]
    async fn successful_sync_job_is_marked_completed() {
        let subscription_id = Uuid::new_v4();
        let claimed = job(
            "subscription_sync",
            json!({ "subscription_id": subscription_id }),
            0,
            3,
        );
        let claimed_id = claimed.id;

        let mut parts = RunnerParts::new();
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let claimed = claimed.clone();
            Box::pin(async move { Ok(vec![claimed]) })
        });
        parts
            .job_repo
            .expect_mark_completed()
            .withf(move |id| *id == claimed_id)
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));
        parts
            .syncer
            .expect_sync_one()
            .withf(move |id| *id == subscription_id)
            .times(1)
            .returning(|_| Ok(()));

        let processed = parts.build().process_pending_jobs().await.unwrap();
        assert_eq!(processed, 1);
    }

    #[tokio::test]
    async fn transient_failure_reschedules_with_backoff() {
        let claimed = job(
            "subscription_sync",
            json!({ "subscription_id": Uuid::new_v4() }),
            0,
            3,
        );
        let claimed_id = claimed.id;
        let before = Utc::now();

        let mut parts = RunnerParts::new();
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let claimed = claimed.clone();
            Box::pin(async move { Ok(vec![claimed]) })
        });
        parts
            .syncer
            .expect_sync_one()
            .returning(|_| Err(anyhow!("provider timeout")));
        parts
            .job_repo
            .expect_reschedule()
            .withf(move |id, retry_count, next_attempt_at, error| {
                *id == claimed_id
                    && *retry_count == 1
                    && *next_attempt_at > before
                    && error.contains("provider timeout")
            })
            .times(1)
            .returning(|_, _, _, _| Box::pin(async { Ok(()) }));
        parts.job_repo.expect_mark_failed().times(0);

        parts.build().process_pending_jobs().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_retries_fail_terminally() {
        // retry_count 2 of max 2: the next failure is the third and last
        // attempt overall.
        let claimed = job(
            "subscription_sync",
            json!({ "subscription_id": Uuid::new_v4() }),
            2,
            2,
        );
        let claimed_id = claimed.id;

        let mut parts = RunnerParts::new();
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let claimed = claimed.clone();
            Box::pin(async move { Ok(vec![claimed]) })
        });
        parts
            .syncer
            .expect_sync_one()
            .returning(|_| Err(anyhow!("still down")));
        parts.job_repo.expect_reschedule().times(0);
        parts
            .job_repo
            .expect_mark_failed()
            .withf(move |id, error| *id == claimed_id && error.contains("still down"))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        parts.build().process_pending_jobs().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_job_type_fails_permanently_without_blocking_batch() {
        let bad = job("make_coffee", json!({}), 0, 3);
        let subscription_id = Uuid::new_v4();
        let good = job(
            "subscription_sync",
            json!({ "subscription_id": subscription_id }),
            0,
            3,
        );
        let bad_id = bad.id;
        let good_id = good.id;

        let mut parts = RunnerParts::new();
        let batch = vec![bad, good];
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let batch = batch.clone();
            Box::pin(async move { Ok(batch) })
        });
        parts
            .job_repo
            .expect_mark_failed()
            .withf(move |id, error| *id == bad_id && error.contains("unknown job type"))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        parts
            .job_repo
            .expect_mark_completed()
            .withf(move |id| *id == good_id)
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));
        parts.syncer.expect_sync_one().returning(|_| Ok(()));

        let processed = parts.build().process_pending_jobs().await.unwrap();
        assert_eq!(processed, 2);
    }

    #[tokio::test]
    async fn undecodable_payload_fails_permanently() {
        let claimed = job("payment_verify", json!({ "wrong_key": 1 }), 0, 3);
        let claimed_id = claimed.id;

        let mut parts = RunnerParts::new();
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let claimed = claimed.clone();
            Box::pin(async move { Ok(vec![claimed]) })
        });
        parts
            .job_repo
            .expect_mark_failed()
            .withf(move |id, error| *id == claimed_id && error.contains("does not decode"))
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        parts.job_repo.expect_reschedule().times(0);

        parts.build().process_pending_jobs().await.unwrap();
    }

    #[tokio::test]
    async fn webhook_retry_job_replays_stored_event() {
        let event = json!({
            "event": "subscription.charged",
            "created_at": 1_700_000_000,
            "payload": {
                "subscription": { "entity": { "id": "sub_abc", "status": "active" } },
                "payment": {
                    "entity": {
                        "id": "pay_def",
                        "amount": 49900,
                        "currency": "INR",
                        "status": "captured"
                    }
                }
            }
        });
        let claimed = job(
            "webhook_retry",
            json!({ "event": event, "error": "deadlock detected" }),
            1,
            3,
        );

        let mut parts = RunnerParts::new();
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let claimed = claimed.clone();
            Box::pin(async move { Ok(vec![claimed]) })
        });
        parts
            .replayer
            .expect_replay()
            .withf(|event| event.event == "subscription.charged")
            .times(1)
            .returning(|_| Ok(WebhookOutcome::ok("webhook processed")));
        parts
            .job_repo
            .expect_mark_completed()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        parts.build().process_pending_jobs().await.unwrap();
    }

    #[tokio::test]
    async fn refund_job_refunds_at_provider_then_records_locally() {
        let claimed = job(
            "refund_process",
            json!({ "provider_payment_id": "pay_def", "amount": 10000, "reason": "requested" }),
            0,
            3,
        );

        let mut parts = RunnerParts::new();
        parts.job_repo.expect_claim_due_jobs().returning(move |_, _, _| {
            let claimed = claimed.clone();
            Box::pin(async move { Ok(vec![claimed]) })
        });
        parts
            .gateway
            .expect_create_refund()
            .withf(|payment_id, amount, reason| {
                payment_id == "pay_def" && *amount == Some(10000) && reason == &Some("requested")
            })
            .times(1)
            .returning(|payment_id, _, _| {
                Ok(RazorpayRefund {
                    id: "rfnd_1".to_string(),
                    payment_id: payment_id.to_string(),
                    amount: 10000,
                    currency: "INR".to_string(),
                    status: "processed".to_string(),
                })
            });
        parts
            .payment_repo
            .expect_apply_refund()
            .withf(|payment_id, amount, _, _| payment_id == "pay_def" && *amount == 10000)
            .times(1)
            .returning(|payment_id, amount, reason, refunded_at| {
                Box::pin(async move {
                    Ok(crates::domain::entities::payments::PaymentEntity {
                        id: Uuid::new_v4(),
                        subscription_id: None,
                        user_id: Uuid::new_v4(),
                        provider_payment_id: payment_id,
                        provider_order_id: None,
                        amount: 10000,
                        currency: "INR".to_string(),
                        status: "refunded".to_string(),
                        method: None,
                        refund_amount: amount,
                        refunded_at: Some(refunded_at),
                        refund_reason: reason,
                        failure_reason: None,
                        gateway_data: json!({}),
                        created_at: Utc::now(),
                        updated_at: Utc::now(),
                    })
                })
            });
        parts
            .job_repo
            .expect_mark_completed()
            .times(1)
            .returning(|_| Box::pin(async { Ok(()) }));

        parts.build().process_pending_jobs().await.unwrap();
    }
}
