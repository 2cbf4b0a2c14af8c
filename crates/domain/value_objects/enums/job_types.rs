use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobType {
    SubscriptionSync,
    SubscriptionFetch,
    PaymentVerify,
    WebhookRetry,
    CustomerCreate,
    RefundProcess,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SubscriptionSync => "subscription_sync",
            JobType::SubscriptionFetch => "subscription_fetch",
            JobType::PaymentVerify => "payment_verify",
            JobType::WebhookRetry => "webhook_retry",
            JobType::CustomerCreate => "customer_create",
            JobType::RefundProcess => "refund_process",
        }
    }

    /// A stored type string that does not parse indicates a defect, not a
    /// transient fault; callers treat it as a permanent job failure.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "subscription_sync" => Some(JobType::SubscriptionSync),
            "subscription_fetch" => Some(JobType::SubscriptionFetch),
            "payment_verify" => Some(JobType::PaymentVerify),
            "webhook_retry" => Some(JobType::WebhookRetry),
            "customer_create" => Some(JobType::CustomerCreate),
            "refund_process" => Some(JobType::RefundProcess),
            _ => None,
        }
    }
}

impl Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
