use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    domain::{
        entities::{
            payments::InsertPaymentEntity,
            processed_webhooks::{InsertProcessedWebhookEntity, ProcessedWebhookEntity},
            subscriptions::SubscriptionEntity,
        },
        repositories::webhooks::BillingWebhookRepository,
        value_objects::{
            enums::{
                subscription_statuses::SubscriptionStatus, user_tiers::UserTier,
            },
            webhooks::{NewPaymentRecord, WebhookApplyOutcome, WebhookMutation},
        },
    },
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{payments, processed_webhooks, subscriptions, users},
    },
};

/// Days a past_due subscription keeps the user on pro before the sync job
/// force-expires it.
pub const GRACE_PERIOD_DAYS: i64 = 3;

pub struct BillingWebhookPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl BillingWebhookPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }

    fn load_subscription(
        conn: &mut PgConnection,
        provider_subscription_id: &str,
    ) -> Result<SubscriptionEntity> {
        subscriptions::table
            .filter(subscriptions::provider_subscription_id.eq(provider_subscription_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(conn)
            .optional()?
            .ok_or_else(|| {
                anyhow!(
                    "no local subscription for provider id {}",
                    provider_subscription_id
                )
            })
    }

    fn merged_metadata(current: &Value, extra: Vec<(&str, Value)>) -> Value {
        let mut map = match current {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        for (key, value) in extra {
            map.insert(key.to_string(), value);
        }
        Value::Object(map)
    }

    fn insert_payment(
        conn: &mut PgConnection,
        subscription: &SubscriptionEntity,
        record: &NewPaymentRecord,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let entity = InsertPaymentEntity {
            subscription_id: Some(subscription.id),
            user_id: subscription.user_id,
            provider_payment_id: record.provider_payment_id.clone(),
            provider_order_id: record.provider_order_id.clone(),
            amount: record.amount,
            currency: record.currency.clone(),
            status: record.status.to_string(),
            method: record.method.clone(),
            refund_amount: 0,
            failure_reason: record.failure_reason.clone(),
            gateway_data: record.gateway_data.clone(),
            created_at: now,
            updated_at: now,
        };

        let payment_id = diesel::insert_into(payments::table)
            .values(&entity)
            .returning(payments::id)
            .get_result::<Uuid>(conn)?;

        Ok(payment_id)
    }

    fn set_user_tier(
        conn: &mut PgConnection,
        user_id: Uuid,
        tier: UserTier,
        subscription_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        diesel::update(users::table.find(user_id))
            .set((
                users::subscription_tier.eq(tier.as_str()),
                users::subscription_id.eq(subscription_id),
                users::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn update_subscription(
        conn: &mut PgConnection,
        subscription: &SubscriptionEntity,
        status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        cancelled_at: Option<DateTime<Utc>>,
        grace_period_end: Option<DateTime<Utc>>,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        diesel::update(subscriptions::table.find(subscription.id))
            .set((
                subscriptions::status.eq(status.as_str()),
                subscriptions::current_period_start
                    .eq(period_start.or(subscription.current_period_start)),
                subscriptions::current_period_end
                    .eq(period_end.or(subscription.current_period_end)),
                subscriptions::cancelled_at.eq(cancelled_at.or(subscription.cancelled_at)),
                subscriptions::grace_period_end
                    .eq(grace_period_end.or(subscription.grace_period_end)),
                subscriptions::last_webhook_at.eq(Some(now)),
                subscriptions::metadata.eq(metadata),
                subscriptions::updated_at.eq(now),
            ))
            .execute(conn)?;

        Ok(())
    }

    fn apply_mutation(
        conn: &mut PgConnection,
        mutation: &WebhookMutation,
        event_type: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let subscription = Self::load_subscription(conn, mutation.provider_subscription_id())?;

        match mutation {
            WebhookMutation::Charged {
                period_start,
                period_end,
                payment,
                ..
            } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![
                        ("last_event", json!(event_type)),
                        ("last_payment_id", json!(payment.provider_payment_id)),
                    ],
                );
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::Active,
                    *period_start,
                    *period_end,
                    None,
                    None,
                    metadata,
                    now,
                )?;
                Self::insert_payment(conn, &subscription, payment, now)?;
                Self::set_user_tier(
                    conn,
                    subscription.user_id,
                    UserTier::Pro,
                    Some(subscription.id),
                    now,
                )?;
            }
            WebhookMutation::Authenticated { .. } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![("last_event", json!(event_type))],
                );
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::Authenticated,
                    None,
                    None,
                    None,
                    None,
                    metadata,
                    now,
                )?;
            }
            WebhookMutation::Activated {
                period_start,
                period_end,
                ..
            } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![("last_event", json!(event_type))],
                );
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::Active,
                    *period_start,
                    *period_end,
                    None,
                    None,
                    metadata,
                    now,
                )?;
                Self::set_user_tier(
                    conn,
                    subscription.user_id,
                    UserTier::Pro,
                    Some(subscription.id),
                    now,
                )?;
            }
            WebhookMutation::Cancelled { .. } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![("last_event", json!(event_type))],
                );
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::Cancelled,
                    None,
                    None,
                    Some(now),
                    None,
                    metadata,
                    now,
                )?;
                Self::set_user_tier(conn, subscription.user_id, UserTier::Free, None, now)?;
            }
            WebhookMutation::PaymentFailed {
                failure_reason,
                payment,
                ..
            } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![
                        ("last_event", json!(event_type)),
                        ("last_failure_reason", json!(failure_reason)),
                    ],
                );
                // The user keeps pro: the grace window gives them time to
                // fix the payment method before the sync job downgrades.
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::PastDue,
                    None,
                    None,
                    None,
                    Some(now + Duration::days(GRACE_PERIOD_DAYS)),
                    metadata,
                    now,
                )?;
                if let Some(payment) = payment {
                    Self::insert_payment(conn, &subscription, payment, now)?;
                }
            }
            WebhookMutation::Paused { .. } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![("last_event", json!(event_type))],
                );
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::Paused,
                    None,
                    None,
                    None,
                    None,
                    metadata,
                    now,
                )?;
            }
            WebhookMutation::Resumed { .. } => {
                let metadata = Self::merged_metadata(
                    &subscription.metadata,
                    vec![("last_event", json!(event_type))],
                );
                Self::update_subscription(
                    conn,
                    &subscription,
                    SubscriptionStatus::Active,
                    None,
                    None,
                    None,
                    None,
                    metadata,
                    now,
                )?;
                Self::set_user_tier(
                    conn,
                    subscription.user_id,
                    UserTier::Pro,
                    Some(subscription.id),
                    now,
                )?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BillingWebhookRepository for BillingWebhookPostgres {
    async fn find_processed(&self, webhook_id: String) -> Result<Option<ProcessedWebhookEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let processed = processed_webhooks::table
            .filter(processed_webhooks::webhook_id.eq(&webhook_id))
            .select(ProcessedWebhookEntity::as_select())
            .first::<ProcessedWebhookEntity>(&mut conn)
            .optional()?;

        Ok(processed)
    }

    async fn apply_event(
        &self,
        ledger: InsertProcessedWebhookEntity,
        mutation: WebhookMutation,
    ) -> Result<WebhookApplyOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();
        let event_type = ledger.event_type.clone();

        let result = conn.transaction::<(), anyhow::Error, _>(|conn| {
            // Ledger first: if this insert survives the transaction, the
            // mutation committed with it; if anything below fails, both
            // roll back together.
            diesel::insert_into(processed_webhooks::table)
                .values(&ledger)
                .execute(conn)?;

            Self::apply_mutation(conn, &mutation, &event_type, now)
        });

        match result {
            Ok(()) => Ok(WebhookApplyOutcome::Applied),
            Err(err) => {
                let unique_violation = matches!(
                    err.downcast_ref::<diesel::result::Error>(),
                    Some(diesel::result::Error::DatabaseError(
                        DatabaseErrorKind::UniqueViolation,
                        _,
                    ))
                );
                if unique_violation {
                    // A concurrent delivery inserted the ledger row first.
                    Ok(WebhookApplyOutcome::Duplicate)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let deleted = diesel::delete(
            processed_webhooks::table.filter(processed_webhooks::processed_at.lt(cutoff)),
        )
        .execute(&mut conn)?;

        Ok(deleted)
    }
}
