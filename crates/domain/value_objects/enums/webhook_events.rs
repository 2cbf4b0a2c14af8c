use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The provider webhook events this system reacts to. Anything else is
/// acknowledged as a no-op so the provider sees a 2xx and stops redelivering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebhookEventKind {
    SubscriptionCharged,
    SubscriptionAuthenticated,
    SubscriptionActivated,
    SubscriptionCancelled,
    SubscriptionPaused,
    SubscriptionResumed,
    PaymentFailed,
}

impl WebhookEventKind {
    pub fn from_event_name(value: &str) -> Option<Self> {
        match value {
            "subscription.charged" => Some(WebhookEventKind::SubscriptionCharged),
            "subscription.authenticated" => Some(WebhookEventKind::SubscriptionAuthenticated),
            "subscription.activated" => Some(WebhookEventKind::SubscriptionActivated),
            "subscription.cancelled" => Some(WebhookEventKind::SubscriptionCancelled),
            "subscription.paused" => Some(WebhookEventKind::SubscriptionPaused),
            "subscription.resumed" => Some(WebhookEventKind::SubscriptionResumed),
            "payment.failed" => Some(WebhookEventKind::PaymentFailed),
            _ => None,
        }
    }

    pub fn as_event_name(&self) -> &'static str {
        match self {
            WebhookEventKind::SubscriptionCharged => "subscription.charged",
            WebhookEventKind::SubscriptionAuthenticated => "subscription.authenticated",
            WebhookEventKind::SubscriptionActivated => "subscription.activated",
            WebhookEventKind::SubscriptionCancelled => "subscription.cancelled",
            WebhookEventKind::SubscriptionPaused => "subscription.paused",
            WebhookEventKind::SubscriptionResumed => "subscription.resumed",
            WebhookEventKind::PaymentFailed => "payment.failed",
        }
    }
}

impl Display for WebhookEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_event_name())
    }
}
