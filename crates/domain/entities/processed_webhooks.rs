use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::infra::db::postgres::schema::processed_webhooks;

/// Idempotency-ledger row. `webhook_id` carries a unique index; inserting it
/// is always the first write of a webhook transaction.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = processed_webhooks)]
pub struct ProcessedWebhookEntity {
    pub id: Uuid,
    pub webhook_id: String,
    pub event_type: String,
    pub subscription_id: Option<Uuid>,
    pub payment_id: Option<String>,
    pub metadata: Value,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = processed_webhooks)]
pub struct InsertProcessedWebhookEntity {
    pub webhook_id: String,
    pub event_type: String,
    pub subscription_id: Option<Uuid>,
    pub payment_id: Option<String>,
    pub metadata: Value,
    pub processed_at: DateTime<Utc>,
}
