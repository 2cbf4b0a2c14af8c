use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        repositories::subscriptions::SubscriptionRepository,
        value_objects::enums::{
            subscription_statuses::SubscriptionStatus, user_tiers::UserTier,
        },
    },
    infra::db::postgres::{
        postgres_connection::PgPoolSquad,
        schema::{subscriptions, users},
    },
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_current_subscription(
        &self,
        user_id: Uuid,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // The user's back-reference is the source of "current"; it is
        // cleared exactly when the tier drops to free.
        let subscription_id: Option<Option<Uuid>> = users::table
            .find(user_id)
            .select(users::subscription_id)
            .first::<Option<Uuid>>(&mut conn)
            .optional()?;

        let Some(Some(subscription_id)) = subscription_id else {
            return Ok(None);
        };

        let subscription = subscriptions::table
            .find(subscription_id)
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(subscription)
    }

    async fn create_subscription(
        &self,
        insert_subscription_entity: InsertSubscriptionEntity,
    ) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let subscription_id = diesel::insert_into(subscriptions::table)
            .values(&insert_subscription_entity)
            .returning(subscriptions::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(subscription_id)
    }

    async fn cancel_locally(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        conn.transaction::<(), anyhow::Error, _>(|conn| {
            diesel::update(subscriptions::table.find(subscription_id))
                .set((
                    subscriptions::status.eq(SubscriptionStatus::Cancelled.as_str()),
                    subscriptions::cancelled_at.eq(Some(cancelled_at)),
                    subscriptions::updated_at.eq(cancelled_at),
                ))
                .execute(conn)?;

            diesel::update(users::table.find(user_id))
                .set((
                    users::subscription_tier.eq(UserTier::Free.as_str()),
                    users::subscription_id.eq(None::<Uuid>),
                    users::updated_at.eq(cancelled_at),
                ))
                .execute(conn)?;

            Ok(())
        })?;

        Ok(())
    }
}
