use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use crates::{
    domain::{
        entities::{jobs::InsertJobEntity, subscriptions::SubscriptionEntity},
        repositories::{jobs::JobRepository, sync::SubscriptionSyncRepository},
        value_objects::{
            enums::{job_types::JobType, subscription_statuses::SubscriptionStatus},
            jobs::SubscriptionSyncPayload,
            sync::{SyncDiscrepancy, SyncError, SyncResult, UserTierAction},
        },
    },
    infra::db::repositories::webhooks::GRACE_PERIOD_DAYS,
    payments::razorpay_client::RazorpaySubscription,
    reliability::circuit_breaker::CircuitBreaker,
};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::usecases::gateway::BillingGateway;

/// Delay before a queued per-subscription retry after a fetch failure.
const SYNC_RETRY_DELAY_MS: i64 = 5000;

#[derive(Debug, Error)]
pub enum SyncUseCaseError {
    #[error("subscription not found")]
    SubscriptionNotFound,
    #[error("subscription has no provider subscription id")]
    NotLinkedToProvider,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SyncUseCaseError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SyncUseCaseError::SubscriptionNotFound => StatusCode::NOT_FOUND,
            SyncUseCaseError::NotLinkedToProvider => StatusCode::BAD_REQUEST,
            SyncUseCaseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type SyncUseCaseResult<T> = std::result::Result<T, SyncUseCaseError>;

/// What one reconciliation comparison decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Local already agrees with the provider (or the difference is one we
    /// deliberately leave to webhooks/grace expiry).
    InSync,
    Overwrite {
        new_status: SubscriptionStatus,
        user_action: UserTierAction,
    },
}

/// One-directional precedence: the provider's view wins for the transitions
/// that matter, and nothing else is touched.
pub fn plan_reconciliation(
    local: SubscriptionStatus,
    provider: SubscriptionStatus,
) -> ReconcileDecision {
    // Terminal provider states are authoritative regardless of local state.
    if provider.is_terminal() && provider != local {
        return ReconcileDecision::Overwrite {
            new_status: provider,
            user_action: UserTierAction::Downgrade,
        };
    }

    match (local, provider) {
        // Payment recovered since the last webhook we saw.
        (SubscriptionStatus::PastDue, SubscriptionStatus::Active) => {
            ReconcileDecision::Overwrite {
                new_status: SubscriptionStatus::Active,
                user_action: UserTierAction::EnsurePro,
            }
        }
        // A failure webhook was missed. The user keeps pro until the grace
        // window runs out, so no tier action here.
        (SubscriptionStatus::Active, SubscriptionStatus::PastDue) => {
            ReconcileDecision::Overwrite {
                new_status: SubscriptionStatus::PastDue,
                user_action: UserTierAction::None,
            }
        }
        _ => ReconcileDecision::InSync,
    }
}

pub struct SubscriptionSyncUseCase<R, J, G>
where
    R: SubscriptionSyncRepository + Send + Sync + 'static,
    J: JobRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    sync_repo: Arc<R>,
    job_repo: Arc<J>,
    gateway: Arc<G>,
    breaker: Arc<CircuitBreaker>,
}

impl<R, J, G> SubscriptionSyncUseCase<R, J, G>
where
    R: SubscriptionSyncRepository + Send + Sync + 'static,
    J: JobRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(
        sync_repo: Arc<R>,
        job_repo: Arc<J>,
        gateway: Arc<G>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            sync_repo,
            job_repo,
            gateway,
            breaker,
        }
    }

    /// Full reconciliation pass over every live subscription, followed by
    /// grace-period expiry. One subscription's failure never aborts the
    /// batch: it is recorded, queued for an individual retry, and the pass
    /// moves on.
    pub async fn sync_subscriptions(&self) -> SyncUseCaseResult<SyncResult> {
        let subscriptions = self.sync_repo.list_live_subscriptions().await.map_err(|err| {
            error!(db_error = ?err, "sync: failed to list live subscriptions");
            SyncUseCaseError::Internal(err)
        })?;

        let mut result = SyncResult {
            total_subscriptions: subscriptions.len(),
            ..SyncResult::default()
        };

        info!(
            total = result.total_subscriptions,
            "sync: reconciliation pass started"
        );

        for subscription in subscriptions {
            match self.sync_entity(&subscription).await {
                Ok(Some(discrepancy)) => {
                    result.discrepancies_found += 1;
                    result.synced_count += 1;
                    result.discrepancies.push(discrepancy);
                }
                Ok(None) => result.synced_count += 1,
                Err(err) => {
                    let provider_subscription_id = subscription
                        .provider_subscription_id
                        .clone()
                        .unwrap_or_default();
                    warn!(
                        subscription_id = %subscription.id,
                        %provider_subscription_id,
                        error = %err,
                        "sync: subscription failed, queueing individual retry"
                    );
                    result.errors_count += 1;
                    result.errors.push(SyncError {
                        subscription_id: subscription.id,
                        provider_subscription_id,
                        error: err.to_string(),
                    });
                    self.enqueue_sync_retry(subscription.id).await;
                }
            }
        }

        result.grace_period_expired = self.expire_grace_periods().await?;

        info!(
            total = result.total_subscriptions,
            synced = result.synced_count,
            discrepancies = result.discrepancies_found,
            errors = result.errors_count,
            grace_expired = result.grace_period_expired,
            "sync: reconciliation pass finished"
        );

        Ok(result)
    }

    /// Reconciles a single subscription by local id. Used by the queued
    /// per-subscription retry jobs and the ops surface.
    pub async fn sync_one(&self, subscription_id: Uuid) -> SyncUseCaseResult<Option<SyncDiscrepancy>> {
        let subscription = self
            .sync_repo
            .find_by_id(subscription_id)
            .await
            .map_err(SyncUseCaseError::Internal)?
            .ok_or(SyncUseCaseError::SubscriptionNotFound)?;

        self.sync_entity(&subscription)
            .await
            .map_err(SyncUseCaseError::Internal)
    }

    /// Reconciles a single subscription by the provider's id. Used by
    /// `subscription_fetch` jobs created before a local row existed.
    pub async fn sync_by_provider_id(
        &self,
        provider_subscription_id: String,
    ) -> SyncUseCaseResult<Option<SyncDiscrepancy>> {
        let subscription = self
            .sync_repo
            .find_by_provider_subscription_id(provider_subscription_id)
            .await
            .map_err(SyncUseCaseError::Internal)?
            .ok_or(SyncUseCaseError::SubscriptionNotFound)?;

        self.sync_entity(&subscription)
            .await
            .map_err(SyncUseCaseError::Internal)
    }

    async fn sync_entity(
        &self,
        subscription: &SubscriptionEntity,
    ) -> anyhow::Result<Option<SyncDiscrepancy>> {
        let provider_subscription_id = subscription
            .provider_subscription_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("subscription has no provider subscription id"))?;

        let gateway = Arc::clone(&self.gateway);
        let id_for_fetch = provider_subscription_id.to_string();
        let fetched = self
            .breaker
            .execute(|| async move { gateway.fetch_subscription(&id_for_fetch).await })
            .await?;

        let local_status = SubscriptionStatus::from_str(&subscription.status)
            .ok_or_else(|| anyhow::anyhow!("unknown local status {}", subscription.status))?;
        let provider_status = SubscriptionStatus::from_provider(&fetched.status)
            .ok_or_else(|| anyhow::anyhow!("unknown provider status {}", fetched.status))?;

        match plan_reconciliation(local_status, provider_status) {
            ReconcileDecision::InSync => {
                self.sync_repo
                    .stamp_synced(subscription.id, fetched.status.clone())
                    .await?;
                Ok(None)
            }
            ReconcileDecision::Overwrite {
                new_status,
                user_action,
            } => {
                let (period_start, period_end) = Self::period_bounds(&fetched);

                info!(
                    subscription_id = %subscription.id,
                    local_status = %local_status,
                    provider_status = %fetched.status,
                    new_status = %new_status,
                    "sync: correcting discrepancy"
                );

                self.sync_repo
                    .apply_reconciliation(
                        subscription.id,
                        subscription.user_id,
                        new_status,
                        period_start,
                        period_end,
                        fetched.status.clone(),
                        user_action,
                    )
                    .await?;

                Ok(Some(SyncDiscrepancy {
                    subscription_id: subscription.id,
                    provider_subscription_id: provider_subscription_id.to_string(),
                    local_status: local_status.to_string(),
                    provider_status: fetched.status,
                    action: new_status.to_string(),
                }))
            }
        }
    }

    /// Downgrades past_due subscriptions whose grace window has run out.
    pub async fn expire_grace_periods(&self) -> SyncUseCaseResult<usize> {
        let cutoff = Utc::now() - Duration::days(GRACE_PERIOD_DAYS);
        let expired = self
            .sync_repo
            .list_grace_period_expired(cutoff)
            .await
            .map_err(SyncUseCaseError::Internal)?;

        let mut count = 0usize;
        for subscription in expired {
            match self
                .sync_repo
                .expire_grace_period(subscription.id, subscription.user_id)
                .await
            {
                Ok(()) => {
                    info!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        "sync: grace period expired, user downgraded"
                    );
                    count += 1;
                }
                Err(err) => {
                    error!(
                        subscription_id = %subscription.id,
                        db_error = ?err,
                        "sync: grace period expiry failed"
                    );
                }
            }
        }

        Ok(count)
    }

    async fn enqueue_sync_retry(&self, subscription_id: Uuid) {
        let payload = SubscriptionSyncPayload { subscription_id };
        let Ok(payload) = serde_json::to_value(&payload) else {
            return;
        };

        let job = InsertJobEntity::deferred(
            JobType::SubscriptionSync,
            payload,
            Duration::milliseconds(SYNC_RETRY_DELAY_MS),
            None,
        );

        if let Err(err) = self.job_repo.create_job(job).await {
            // The next full pass will pick the subscription up anyway.
            error!(%subscription_id, db_error = ?err, "sync: failed to enqueue retry job");
        }
    }

    fn period_bounds(
        fetched: &RazorpaySubscription,
    ) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        let to_utc = |secs: Option<i64>| secs.and_then(|s| Utc.timestamp_opt(s, 0).single());
        (to_utc(fetched.current_start), to_utc(fetched.current_end))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use crates::domain::repositories::{
        jobs::MockJobRepository, sync::MockSubscriptionSyncRepository,
    };
    use crates::reliability::circuit_breaker::CircuitBreakerConfig;
    use serde_json::json;

    use super::*;
    use crate::usecases::gateway::MockBillingGateway;

    fn entity(status: &str, provider_id: &str) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: "plan_pro".to_string(),
            provider_subscription_id: Some(provider_id.to_string()),
            provider_customer_id: Some("cust_1".to_string()),
            status: status.to_string(),
            current_period_start: None,
            current_period_end: None,
            cancelled_at: None,
            grace_period_end: None,
            last_sync_at: None,
            last_webhook_at: None,
            metadata: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    fn provider_sub(id: &str, status: &str) -> RazorpaySubscription {
        RazorpaySubscription {
            id: id.to_string(),
            status: status.to_string(),
            plan_id: Some("plan_pro".to_string()),
            customer_id: Some("cust_1".to_string()),
            current_start: Some(1_700_000_000),
            current_end: Some(1_702_592_000),
            ended_at: None,
            short_url: None,
            paid_count: Some(1),
            total_count: Some(12),
        }
    }

    fn breaker() -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "razorpay",
            CircuitBreakerConfig::default(),
        ))
    }

    fn usecase(
        sync_repo: MockSubscriptionSyncRepository,
        job_repo: MockJobRepository,
        gateway: MockBillingGateway,
    ) -> SubscriptionSyncUseCase<MockSubscriptionSyncRepository, MockJobRepository, MockBillingGateway>
    {
        SubscriptionSyncUseCase::new(
            Arc::new(sync_repo),
            Arc::new(job_repo),
            Arc::new(gateway),
            breaker(),
        )
    }

    #[test]
    fn precedence_rules_are_one_directional() {
        // Terminal provider states always win.
        assert_eq!(
            plan_reconciliation(SubscriptionStatus::Active, SubscriptionStatus::Cancelled),
            ReconcileDecision::Overwrite {
                new_status: SubscriptionStatus::Cancelled,
                user_action: UserTierAction::Downgrade,
            }
        );
        assert_eq!(
            plan_reconciliation(SubscriptionStatus::PastDue, SubscriptionStatus::Expired),
            ReconcileDecision::Overwrite {
                new_status: SubscriptionStatus::Expired,
                user_action: UserTierAction::Downgrade,
            }
        );

        // Payment recovered.
        assert_eq!(
            plan_reconciliation(SubscriptionStatus::PastDue, SubscriptionStatus::Active),
            ReconcileDecision::Overwrite {
                new_status: SubscriptionStatus::Active,
                user_action: UserTierAction::EnsurePro,
            }
        );

        // Missed failure webhook; tier untouched until grace expiry.
        assert_eq!(
            plan_reconciliation(SubscriptionStatus::Active, SubscriptionStatus::PastDue),
            ReconcileDecision::Overwrite {
                new_status: SubscriptionStatus::PastDue,
                user_action: UserTierAction::None,
            }
        );

        // Agreement and non-trigger differences are no-ops.
        assert_eq!(
            plan_reconciliation(SubscriptionStatus::Active, SubscriptionStatus::Active),
            ReconcileDecision::InSync
        );
        assert_eq!(
            plan_reconciliation(SubscriptionStatus::Authenticated, SubscriptionStatus::Active),
            ReconcileDecision::InSync
        );
    }

    #[tokio::test]
    async fn corrects_missed_failure_webhook() {
        let local = entity("active", "sub_1");
        let local_id = local.id;

        let mut sync_repo = MockSubscriptionSyncRepository::new();
        let listed = local.clone();
        sync_repo
            .expect_list_live_subscriptions()
            .returning(move || {
                let listed = listed.clone();
                Box::pin(async move { Ok(vec![listed]) })
            });
        sync_repo
            .expect_apply_reconciliation()
            .withf(move |id, _, new_status, _, _, provider_status, action| {
                *id == local_id
                    && *new_status == SubscriptionStatus::PastDue
                    && provider_status == "pending"
                    && *action == UserTierAction::None
            })
            .times(1)
            .returning(|_, _, _, _, _, _, _| Box::pin(async { Ok(()) }));
        sync_repo
            .expect_list_grace_period_expired()
            .returning(|_| Box::pin(async { Ok(vec![]) }));

        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_fetch_subscription()
            .returning(|id| Ok(provider_sub(id, "pending")));

        let job_repo = MockJobRepository::new();

        let result = usecase(sync_repo, job_repo, gateway)
            .sync_subscriptions()
            .await
            .unwrap();

        assert_eq!(result.total_subscriptions, 1);
        assert_eq!(result.discrepancies_found, 1);
        assert_eq!(result.errors_count, 0);
        assert_eq!(result.discrepancies[0].action, "past_due");
    }

    #[tokio::test]
    async fn in_sync_subscription_is_stamped_only() {
        let local = entity("active", "sub_1");

        let mut sync_repo = MockSubscriptionSyncRepository::new();
        let listed = local.clone();
        sync_repo
            .expect_list_live_subscriptions()
            .returning(move || {
                let listed = listed.clone();
                Box::pin(async move { Ok(vec![listed]) })
            });
        sync_repo.expect_apply_reconciliation().times(0);
        sync_repo
            .expect_stamp_synced()
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));
        sync_repo
            .expect_list_grace_period_expired()
            .returning(|_| Box::pin(async { Ok(vec![]) }));

        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_fetch_subscription()
            .returning(|id| Ok(provider_sub(id, "active")));

        let result = usecase(sync_repo, MockJobRepository::new(), gateway)
            .sync_subscriptions()
            .await
            .unwrap();

        assert_eq!(result.discrepancies_found, 0);
        assert_eq!(result.synced_count, 1);
    }

    #[tokio::test]
    async fn fetch_failure_records_error_and_queues_retry_without_aborting() {
        let failing = entity("active", "sub_bad");
        let healthy = entity("past_due", "sub_good");
        let healthy_id = healthy.id;

        let mut sync_repo = MockSubscriptionSyncRepository::new();
        let listed = vec![failing.clone(), healthy.clone()];
        sync_repo
            .expect_list_live_subscriptions()
            .returning(move || {
                let listed = listed.clone();
                Box::pin(async move { Ok(listed) })
            });
        sync_repo
            .expect_apply_reconciliation()
            .withf(move |id, _, new_status, _, _, _, _| {
                *id == healthy_id && *new_status == SubscriptionStatus::Active
            })
            .times(1)
            .returning(|_, _, _, _, _, _, _| Box::pin(async { Ok(()) }));
        sync_repo
            .expect_list_grace_period_expired()
            .returning(|_| Box::pin(async { Ok(vec![]) }));

        let mut gateway = MockBillingGateway::new();
        gateway.expect_fetch_subscription().returning(|id| {
            if id == "sub_bad" {
                Err(anyhow!("connection reset"))
            } else {
                Ok(provider_sub(id, "active"))
            }
        });

        let mut job_repo = MockJobRepository::new();
        job_repo
            .expect_create_job()
            .withf(|job| job.type_ == "subscription_sync")
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let result = usecase(sync_repo, job_repo, gateway)
            .sync_subscriptions()
            .await
            .unwrap();

        assert_eq!(result.total_subscriptions, 2);
        assert_eq!(result.errors_count, 1);
        assert_eq!(result.discrepancies_found, 1);
        assert!(result.errors[0].error.contains("connection reset"));
    }

    #[tokio::test]
    async fn second_pass_with_no_provider_change_finds_no_discrepancies() {
        let local = entity("past_due", "sub_1");

        let mut sync_repo = MockSubscriptionSyncRepository::new();
        let listed = local.clone();
        sync_repo
            .expect_list_live_subscriptions()
            .returning(move || {
                let listed = listed.clone();
                Box::pin(async move { Ok(vec![listed]) })
            });
        sync_repo.expect_apply_reconciliation().times(0);
        sync_repo
            .expect_stamp_synced()
            .returning(|_, _| Box::pin(async { Ok(()) }));
        sync_repo
            .expect_list_grace_period_expired()
            .returning(|_| Box::pin(async { Ok(vec![]) }));

        let mut gateway = MockBillingGateway::new();
        // Provider still says pending, which maps to the local past_due.
        gateway
            .expect_fetch_subscription()
            .returning(|id| Ok(provider_sub(id, "pending")));

        let usecase = usecase(sync_repo, MockJobRepository::new(), gateway);

        let first = usecase.sync_subscriptions().await.unwrap();
        let second = usecase.sync_subscriptions().await.unwrap();

        assert_eq!(first.discrepancies_found, 0);
        assert_eq!(second.discrepancies_found, 0);
    }

    #[tokio::test]
    async fn grace_period_expiry_downgrades_stale_past_due() {
        let stale = entity("past_due", "sub_1");
        let stale_id = stale.id;
        let stale_user = stale.user_id;

        let mut sync_repo = MockSubscriptionSyncRepository::new();
        sync_repo
            .expect_list_live_subscriptions()
            .returning(|| Box::pin(async { Ok(vec![]) }));
        let listed = stale.clone();
        sync_repo
            .expect_list_grace_period_expired()
            .withf(|cutoff| *cutoff < Utc::now())
            .returning(move |_| {
                let listed = listed.clone();
                Box::pin(async move { Ok(vec![listed]) })
            });
        sync_repo
            .expect_expire_grace_period()
            .withf(move |id, user_id| *id == stale_id && *user_id == stale_user)
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let result = usecase(
            sync_repo,
            MockJobRepository::new(),
            MockBillingGateway::new(),
        )
        .sync_subscriptions()
        .await
        .unwrap();

        assert_eq!(result.grace_period_expired, 1);
    }

    #[tokio::test]
    async fn sync_one_unknown_subscription_is_not_found() {
        let mut sync_repo = MockSubscriptionSyncRepository::new();
        sync_repo
            .expect_find_by_id()
            .returning(|_| Box::pin(async { Ok(None) }));

        let result = usecase(
            sync_repo,
            MockJobRepository::new(),
            MockBillingGateway::new(),
        )
        .sync_one(Uuid::new_v4())
        .await;

        assert!(matches!(
            result,
            Err(SyncUseCaseError::SubscriptionNotFound)
        ));
    }
}
