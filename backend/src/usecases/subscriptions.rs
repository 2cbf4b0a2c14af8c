use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use crates::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        repositories::{subscriptions::SubscriptionRepository, users::UserRepository},
        value_objects::enums::subscription_statuses::SubscriptionStatus,
    },
    reliability::circuit_breaker::CircuitBreaker,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use crate::usecases::gateway::BillingGateway;

/// Billing cycles requested when creating a provider subscription (monthly
/// plan, one year of charges before it completes).
const SUBSCRIPTION_TOTAL_COUNT: i64 = 12;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("user not found")]
    UserNotFound,
    #[error("user already has a live subscription")]
    AlreadySubscribed,
    #[error("no active subscription to cancel")]
    SubscriptionNotFound,
    #[error("billing provider is unavailable")]
    ProviderUnavailable(#[source] anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SubscriptionError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            SubscriptionError::UserNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::AlreadySubscribed => StatusCode::BAD_REQUEST,
            SubscriptionError::SubscriptionNotFound => StatusCode::NOT_FOUND,
            SubscriptionError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SubscriptionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, SubscriptionError>;

#[derive(Debug, Serialize)]
pub struct CurrentSubscriptionDto {
    pub id: Uuid,
    pub plan_id: String,
    pub status: String,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub grace_period_end: Option<DateTime<Utc>>,
}

impl From<SubscriptionEntity> for CurrentSubscriptionDto {
    fn from(entity: SubscriptionEntity) -> Self {
        Self {
            id: entity.id,
            plan_id: entity.plan_id,
            status: entity.status,
            current_period_start: entity.current_period_start,
            current_period_end: entity.current_period_end,
            cancelled_at: entity.cancelled_at,
            grace_period_end: entity.grace_period_end,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UpgradeDto {
    pub subscription_id: Uuid,
    pub provider_subscription_id: String,
    /// Hosted checkout page the user completes authorization on. Everything
    /// after that arrives via webhooks.
    pub checkout_url: Option<String>,
}

pub struct SubscriptionUseCase<S, U, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    user_repo: Arc<U>,
    gateway: Arc<G>,
    breaker: Arc<CircuitBreaker>,
    plan_id: String,
}

impl<S, U, G> SubscriptionUseCase<S, U, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        user_repo: Arc<U>,
        gateway: Arc<G>,
        breaker: Arc<CircuitBreaker>,
        plan_id: String,
    ) -> Self {
        Self {
            subscription_repo,
            user_repo,
            gateway,
            breaker,
            plan_id,
        }
    }

    pub async fn get_current_subscription(
        &self,
        user_id: Uuid,
    ) -> UseCaseResult<Option<CurrentSubscriptionDto>> {
        let subscription = self
            .subscription_repo
            .find_current_subscription(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to load current subscription");
                SubscriptionError::Internal(err)
            })?;

        Ok(subscription.map(CurrentSubscriptionDto::from))
    }

    /// Creates a provider subscription for the pro plan and mirrors it
    /// locally in `created`. Activation, the first charge, and the tier
    /// change all arrive later through webhooks.
    pub async fn upgrade(&self, user_id: Uuid) -> UseCaseResult<UpgradeDto> {
        let user = self
            .user_repo
            .find_by_id(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or(SubscriptionError::UserNotFound)?;

        if let Some(current) = self
            .subscription_repo
            .find_current_subscription(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
        {
            let live = SubscriptionStatus::from_str(&current.status)
                .map(|status| !status.is_terminal())
                .unwrap_or(false);
            if live {
                return Err(SubscriptionError::AlreadySubscribed);
            }
        }

        let customer_id = match user.provider_customer_id.clone() {
            Some(existing) => existing,
            None => {
                let gateway = Arc::clone(&self.gateway);
                let email = user.email.clone();
                let customer_id = self
                    .breaker
                    .execute(|| async move { gateway.create_customer(&email, None).await })
                    .await
                    .map_err(SubscriptionError::ProviderUnavailable)?;

                self.user_repo
                    .set_provider_customer_id(user_id, customer_id.clone())
                    .await
                    .map_err(SubscriptionError::Internal)?;

                customer_id
            }
        };

        let gateway = Arc::clone(&self.gateway);
        let plan_id = self.plan_id.clone();
        let customer_for_call = customer_id.clone();
        let provider_subscription = self
            .breaker
            .execute(|| async move {
                gateway
                    .create_subscription(&plan_id, &customer_for_call, SUBSCRIPTION_TOTAL_COUNT)
                    .await
            })
            .await
            .map_err(SubscriptionError::ProviderUnavailable)?;

        let now = Utc::now();
        let to_utc = |secs: Option<i64>| secs.and_then(|s| Utc.timestamp_opt(s, 0).single());

        let subscription_id = self
            .subscription_repo
            .create_subscription(InsertSubscriptionEntity {
                user_id,
                plan_id: self.plan_id.clone(),
                provider_subscription_id: Some(provider_subscription.id.clone()),
                provider_customer_id: Some(customer_id),
                status: SubscriptionStatus::Created.as_str().to_string(),
                current_period_start: to_utc(provider_subscription.current_start),
                current_period_end: to_utc(provider_subscription.current_end),
                metadata: json!({
                    "checkout_url": provider_subscription.short_url,
                    "provider_plan_id": provider_subscription.plan_id,
                }),
                created_at: now,
                updated_at: now,
            })
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "subscriptions: failed to persist new subscription");
                SubscriptionError::Internal(err)
            })?;

        info!(
            %user_id,
            %subscription_id,
            provider_subscription_id = %provider_subscription.id,
            "subscriptions: upgrade initiated"
        );

        Ok(UpgradeDto {
            subscription_id,
            provider_subscription_id: provider_subscription.id,
            checkout_url: provider_subscription.short_url,
        })
    }

    /// Cancels at the provider first, then mirrors locally. If the provider
    /// call fails nothing changes locally and the caller can retry.
    pub async fn cancel(&self, user_id: Uuid) -> UseCaseResult<()> {
        let subscription = self
            .subscription_repo
            .find_current_subscription(user_id)
            .await
            .map_err(SubscriptionError::Internal)?
            .ok_or(SubscriptionError::SubscriptionNotFound)?;

        let status = SubscriptionStatus::from_str(&subscription.status);
        if status.map(|s| s.is_terminal()).unwrap_or(true) {
            return Err(SubscriptionError::SubscriptionNotFound);
        }

        if let Some(provider_subscription_id) = subscription.provider_subscription_id.clone() {
            let gateway = Arc::clone(&self.gateway);
            self.breaker
                .execute(|| async move {
                    gateway.cancel_subscription(&provider_subscription_id).await
                })
                .await
                .map_err(SubscriptionError::ProviderUnavailable)?;
        }

        self.subscription_repo
            .cancel_locally(subscription.id, user_id, Utc::now())
            .await
            .map_err(SubscriptionError::Internal)?;

        info!(%user_id, subscription_id = %subscription.id, "subscriptions: cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use crates::domain::{
        entities::users::UserEntity,
        repositories::{subscriptions::MockSubscriptionRepository, users::MockUserRepository},
    };
    use crates::payments::razorpay_client::RazorpaySubscription;
    use crates::reliability::circuit_breaker::CircuitBreakerConfig;

    use super::*;
    use crate::usecases::gateway::MockBillingGateway;

    fn user(provider_customer_id: Option<&str>) -> UserEntity {
        let now = Utc::now();
        UserEntity {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            subscription_tier: "free".to_string(),
            subscription_id: None,
            provider_customer_id: provider_customer_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    fn subscription(status: &str) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: "plan_pro".to_string(),
            provider_subscription_id: Some("sub_1".to_string()),
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

    fn provider_sub() -> RazorpaySubscription {
        RazorpaySubscription {
            id: "sub_new".to_string(),
            status: "created".to_string(),
            plan_id: Some("plan_pro".to_string()),
            customer_id: Some("cust_1".to_string()),
            current_start: None,
            current_end: None,
            ended_at: None,
            short_url: Some("https://rzp.io/i/abc".to_string()),
            paid_count: Some(0),
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
        subscription_repo: MockSubscriptionRepository,
        user_repo: MockUserRepository,
        gateway: MockBillingGateway,
    ) -> SubscriptionUseCase<MockSubscriptionRepository, MockUserRepository, MockBillingGateway>
    {
        SubscriptionUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(user_repo),
            Arc::new(gateway),
            breaker(),
            "plan_pro".to_string(),
        )
    }

    #[tokio::test]
    async fn upgrade_creates_customer_when_user_has_none() {
        let user_entity = user(None);
        let user_id = user_entity.id;

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_id().returning(move |_| {
            let user_entity = user_entity.clone();
            Box::pin(async move { Ok(Some(user_entity)) })
        });
        user_repo
            .expect_set_provider_customer_id()
            .withf(|_, customer_id| customer_id == "cust_new")
            .times(1)
            .returning(|_, _| Box::pin(async { Ok(()) }));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_subscription()
            .returning(|_| Box::pin(async { Ok(None) }));
        subscription_repo
            .expect_create_subscription()
            .withf(|entity| {
                entity.status == "created"
                    && entity.provider_subscription_id.as_deref() == Some("sub_new")
            })
            .times(1)
            .returning(|_| Box::pin(async { Ok(Uuid::new_v4()) }));

        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_create_customer()
            .times(1)
            .returning(|_, _| Ok("cust_new".to_string()));
        gateway
            .expect_create_subscription()
            .withf(|plan_id, customer_id, total| {
                plan_id == "plan_pro" && customer_id == "cust_new" && *total == 12
            })
            .times(1)
            .returning(|_, _, _| Ok(provider_sub()));

        let dto = usecase(subscription_repo, user_repo, gateway)
            .upgrade(user_id)
            .await
            .unwrap();

        assert_eq!(dto.provider_subscription_id, "sub_new");
        assert_eq!(dto.checkout_url.as_deref(), Some("https://rzp.io/i/abc"));
    }

    #[tokio::test]
    async fn upgrade_rejects_user_with_live_subscription() {
        let user_entity = user(Some("cust_1"));
        let user_id = user_entity.id;

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_id().returning(move |_| {
            let user_entity = user_entity.clone();
            Box::pin(async move { Ok(Some(user_entity)) })
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_subscription()
            .returning(|_| {
                let current = subscription("active");
                Box::pin(async move { Ok(Some(current)) })
            });
        subscription_repo.expect_create_subscription().times(0);

        let result = usecase(subscription_repo, user_repo, MockBillingGateway::new())
            .upgrade(user_id)
            .await;

        assert!(matches!(result, Err(SubscriptionError::AlreadySubscribed)));
    }

    #[tokio::test]
    async fn upgrade_surfaces_provider_outage_without_local_writes() {
        let user_entity = user(Some("cust_1"));
        let user_id = user_entity.id;

        let mut user_repo = MockUserRepository::new();
        user_repo.expect_find_by_id().returning(move |_| {
            let user_entity = user_entity.clone();
            Box::pin(async move { Ok(Some(user_entity)) })
        });

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_subscription()
            .returning(|_| Box::pin(async { Ok(None) }));
        subscription_repo.expect_create_subscription().times(0);

        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_create_subscription()
            .returning(|_, _, _| Err(anyhow!("503 from provider")));

        let result = usecase(subscription_repo, user_repo, gateway)
            .upgrade(user_id)
            .await;

        assert!(matches!(
            result,
            Err(SubscriptionError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn cancel_goes_to_provider_then_mirrors_locally() {
        let current = subscription("active");
        let current_id = current.id;

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_subscription()
            .returning(move |_| {
                let current = current.clone();
                Box::pin(async move { Ok(Some(current)) })
            });
        subscription_repo
            .expect_cancel_locally()
            .withf(move |id, _, _| *id == current_id)
            .times(1)
            .returning(|_, _, _| Box::pin(async { Ok(()) }));

        let mut gateway = MockBillingGateway::new();
        gateway
            .expect_cancel_subscription()
            .withf(|id| id == "sub_1")
            .times(1)
            .returning(|_| Ok(()));

        usecase(subscription_repo, MockUserRepository::new(), gateway)
            .cancel(Uuid::new_v4())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_without_live_subscription_is_not_found() {
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_current_subscription()
            .returning(|_| {
                let current = subscription("cancelled");
                Box::pin(async move { Ok(Some(current)) })
            });
        subscription_repo.expect_cancel_locally().times(0);

        let result = usecase(
            subscription_repo,
            MockUserRepository::new(),
            MockBillingGateway::new(),
        )
        .cancel(Uuid::new_v4())
        .await;

        assert!(matches!(
            result,
            Err(SubscriptionError::SubscriptionNotFound)
        ));
    }
}
