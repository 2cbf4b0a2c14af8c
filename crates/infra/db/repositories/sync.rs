use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::SubscriptionEntity,
        repositories::sync::SubscriptionSyncRepository,
        value_objects::{
            enums::{
                subscription_statuses::SubscriptionStatus, user_tiers::UserTier,
            },
            sync::UserTierAction,
        },
    },
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{subscriptions, users},
    },
};

pub struct SubscriptionSyncPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionSyncPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }

    fn sync_metadata(current: &Value, provider_status: &str, synced_at: DateTime<Utc>) -> Value {
        let mut map = match current {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        map.insert(
            "last_provider_status".to_string(),
            json!(provider_status),
        );
        map.insert("last_sync_at".to_string(), json!(synced_at.to_rfc3339()));
        Value::Object(map)
    }
}

#[async_trait]
impl SubscriptionSyncRepository for SubscriptionSyncPostgres {
    async fn list_live_subscriptions(&self) -> Result<Vec<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let live: Vec<&str> = SubscriptionStatus::LIVE_STATUSES
            .iter()
            .map(|status| status.as_str())
            .collect();

        let results = subscriptions::table
            .filter(
                subscriptions::status
                    .eq_any(live)
                    .and(subscriptions::provider_subscription_id.is_not_null()),
            )
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok(results)
    }

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = subscriptions::table
            .find(subscription_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: String,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription = subscriptions::table
            .filter(subscriptions::provider_subscription_id.eq(&provider_subscription_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn apply_reconciliation(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        new_status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        provider_status: String,
        user_action: UserTierAction,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        conn.transaction::<(), anyhow::Error, _>(|conn| {
            let current: SubscriptionEntity = subscriptions::table
                .find(subscription_id)
                .select(SubscriptionEntity::as_select())
                .first::<SubscriptionEntity>(conn)?;

            let metadata = Self::sync_metadata(&current.metadata, &provider_status, now);

            diesel::update(subscriptions::table.find(subscription_id))
                .set((
                    subscriptions::status.eq(new_status.as_str()),
                    subscriptions::current_period_start
                        .eq(period_start.or(current.current_period_start)),
                    subscriptions::current_period_end
                        .eq(period_end.or(current.current_period_end)),
                    subscriptions::last_sync_at.eq(Some(now)),
                    subscriptions::metadata.eq(metadata),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;

            match user_action {
                UserTierAction::None => {}
                UserTierAction::EnsurePro => {
                    diesel::update(users::table.find(user_id))
                        .set((
                            users::subscription_tier.eq(UserTier::Pro.as_str()),
                            users::subscription_id.eq(Some(subscription_id)),
                            users::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }
                UserTierAction::Downgrade => {
                    diesel::update(users::table.find(user_id))
                        .set((
                            users::subscription_tier.eq(UserTier::Free.as_str()),
                            users::subscription_id.eq(None::<Uuid>),
                            users::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }
            }

            Ok(())
        })?;

        Ok(())
    }

    async fn stamp_synced(&self, subscription_id: Uuid, provider_status: String) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        let current: Option<SubscriptionEntity> = subscriptions::table
            .find(subscription_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        let Some(current) = current else {
            return Ok(());
        };

        let metadata = Self::sync_metadata(&current.metadata, &provider_status, now);

        // Deliberately leaves `updated_at` alone: the grace-period clock
        // keys on the last substantive change, not on sync passes.
        diesel::update(subscriptions::table.find(subscription_id))
            .set((
                subscriptions::last_sync_at.eq(Some(now)),
                subscriptions::metadata.eq(metadata),
            ))
            .execute(&mut conn)?;

        Ok(())
    }

    async fn list_grace_period_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = subscriptions::table
            .filter(
                subscriptions::status
                    .eq(SubscriptionStatus::PastDue.as_str())
                    .and(subscriptions::updated_at.lt(cutoff)),
            )
            .select(SubscriptionEntity::as_select())
            .load::<SubscriptionEntity>(&mut conn)?;

        Ok(results)
    }

    async fn expire_grace_period(&self, subscription_id: Uuid, user_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        conn.transaction::<(), anyhow::Error, _>(|conn| {
            diesel::update(subscriptions::table.find(subscription_id))
                .set((
                    subscriptions::status.eq(SubscriptionStatus::ExpiredGracePeriod.as_str()),
                    subscriptions::grace_period_end.eq(Some(now)),
                    subscriptions::updated_at.eq(now),
                ))
                .execute(conn)?;

            diesel::update(users::table.find(user_id))
                .set((
                    users::subscription_tier.eq(UserTier::Free.as_str()),
                    users::subscription_id.eq(None::<Uuid>),
                    users::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(())
        })?;

        Ok(())
    }
}
