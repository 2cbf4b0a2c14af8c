use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

/// Everything needed to insert one payment row from a webhook, already
/// normalized out of the provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPaymentRecord {
    pub provider_payment_id: String,
    pub provider_order_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub method: Option<String>,
    pub failure_reason: Option<String>,
    /// Raw provider payload, write-once, kept for audit.
    pub gateway_data: Value,
}

/// One webhook's database effect, applied atomically together with its
/// idempotency-ledger row. Keeping this a closed enum makes the repository
/// transaction the single place that knows how each event mutates
/// Subscription/Payment/User.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookMutation {
    /// Billed successfully: subscription active with fresh period bounds,
    /// captured payment recorded, owning user ensured pro.
    Charged {
        provider_subscription_id: String,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
        payment: NewPaymentRecord,
    },
    /// First successful authentication, not yet billed. No tier change.
    Authenticated { provider_subscription_id: String },
    Activated {
        provider_subscription_id: String,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    },
    Cancelled { provider_subscription_id: String },
    /// Charge failed: past_due plus a failed payment row. The user keeps pro
    /// until the sync job's grace-period expiry, so a transient card problem
    /// never causes an instant downgrade.
    PaymentFailed {
        provider_subscription_id: String,
        failure_reason: Option<String>,
        payment: Option<NewPaymentRecord>,
    },
    Paused { provider_subscription_id: String },
    Resumed { provider_subscription_id: String },
}

impl WebhookMutation {
    pub fn provider_subscription_id(&self) -> &str {
        match self {
            WebhookMutation::Charged {
                provider_subscription_id,
                ..
            }
            | WebhookMutation::Authenticated {
                provider_subscription_id,
            }
            | WebhookMutation::Activated {
                provider_subscription_id,
                ..
            }
            | WebhookMutation::Cancelled {
                provider_subscription_id,
            }
            | WebhookMutation::PaymentFailed {
                provider_subscription_id,
                ..
            }
            | WebhookMutation::Paused {
                provider_subscription_id,
            }
            | WebhookMutation::Resumed {
                provider_subscription_id,
            } => provider_subscription_id,
        }
    }
}

/// Result of applying a webhook transaction. `Duplicate` means the ledger
/// insert hit the unique index because a concurrent delivery won the race;
/// the whole transaction rolled back and nothing was applied twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookApplyOutcome {
    Applied,
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookOutcome {
    pub success: bool,
    pub message: String,
}

impl WebhookOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
