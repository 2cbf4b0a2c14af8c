use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity};

/// User-facing subscription persistence. Status transitions other than the
/// initial `created` insert and cancellation mirroring belong exclusively to
/// the webhook handler and the sync job.
#[async_trait]
#[automock]
pub trait SubscriptionRepository {
    async fn find_current_subscription(&self, user_id: Uuid)
    -> Result<Option<SubscriptionEntity>>;

    async fn create_subscription(
        &self,
        insert_subscription_entity: InsertSubscriptionEntity,
    ) -> Result<Uuid>;

    /// One transaction mirroring a provider-acknowledged cancellation:
    /// subscription -> cancelled with `cancelled_at`, user -> free with the
    /// back-reference cleared.
    async fn cancel_locally(
        &self,
        subscription_id: Uuid,
        user_id: Uuid,
        cancelled_at: DateTime<Utc>,
    ) -> Result<()>;
}
