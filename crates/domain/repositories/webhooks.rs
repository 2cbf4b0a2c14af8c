use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

use crate::domain::{
    entities::processed_webhooks::{InsertProcessedWebhookEntity, ProcessedWebhookEntity},
    value_objects::webhooks::{WebhookApplyOutcome, WebhookMutation},
};

#[async_trait]
#[automock]
pub trait BillingWebhookRepository {
    async fn find_processed(&self, webhook_id: String) -> Result<Option<ProcessedWebhookEntity>>;

    /// Applies one webhook in a single transaction: the ledger row is
    /// inserted first, then the mutation's Subscription/Payment/User writes.
    /// A crash or error anywhere rolls back both together, so an event is
    /// never half-applied, and the unique index on `webhook_id` collapses a
    /// concurrent duplicate delivery into `Duplicate`.
    async fn apply_event(
        &self,
        ledger: InsertProcessedWebhookEntity,
        mutation: WebhookMutation,
    ) -> Result<WebhookApplyOutcome>;

    /// Deletes ledger rows older than `cutoff` (90-day anti-replay window).
    async fn delete_expired(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
