use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Typed job payloads. Jobs persist an opaque JSON map; executors decode it
/// into one of these immediately on dispatch so everything past the queue
/// boundary is strongly typed. A payload that fails to decode is a defect
/// and fails the job permanently.

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSyncPayload {
    pub subscription_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionFetchPayload {
    pub provider_subscription_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentVerifyPayload {
    pub provider_payment_id: String,
}

/// Carries the full provider event so a failed webhook can be replayed from
/// the queue instead of relying on the provider's own redelivery window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookRetryPayload {
    pub event: Value,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerCreatePayload {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundProcessPayload {
    pub provider_payment_id: String,
    /// Minor units; `None` refunds the full remaining amount.
    pub amount: Option<i64>,
    pub reason: Option<String>,
}
