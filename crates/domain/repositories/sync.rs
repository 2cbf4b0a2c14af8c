use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::subscriptions::SubscriptionEntity,
    value_objects::{
        enums::subscription_statuses::SubscriptionStatus,
        sync::UserTierAction,
    },
};

#[async_trait]
#[automock]
pub trait SubscriptionSyncRepository {
    /// All subscriptions in the live set (active/past_due/authenticated)
    /// that carry a provider subscription id.
    async fn list_live_subscriptions(&self) -> Result<Vec<SubscriptionEntity>>;

    async fn find_by_id(&self, subscription_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: String,
    ) -> Result<Option<SubscriptionEntity>>;

    /// One transaction: overwrite the subscription's status/period/metadata
    /// with the provider's view and apply the matching user-tier action.
    async fn apply_reconciliation(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        new_status: SubscriptionStatus,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        provider_status: String,
        user_action: UserTierAction,
    ) -> Result<()>;

    /// Records that the subscription was checked even when nothing changed:
    /// stamps `last_sync_at` and caches the provider status in metadata.
    async fn stamp_synced(&self, subscription_id: Uuid, provider_status: String) -> Result<()>;

    /// past_due subscriptions whose last update is older than the grace
    /// window.
    async fn list_grace_period_expired(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<SubscriptionEntity>>;

    /// One transaction: subscription -> expired_grace_period, user -> free
    /// with the back-reference cleared.
    async fn expire_grace_period(&self, subscription_id: Uuid, user_id: Uuid) -> Result<()>;
}
