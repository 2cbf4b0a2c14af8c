use std::fmt::Display;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Created,
    Authenticated,
    Active,
    PastDue,
    Cancelled,
    Expired,
    Unpaid,
    Halted,
    Paused,
    Completed,
    /// Set by the sync job when the grace period runs out, distinct from the
    /// provider-driven `Cancelled`/`Expired` so operators can tell
    /// "we gave up waiting" from "the provider told us it ended".
    ExpiredGracePeriod,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Created => "created",
            SubscriptionStatus::Authenticated => "authenticated",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Unpaid => "unpaid",
            SubscriptionStatus::Halted => "halted",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::Completed => "completed",
            SubscriptionStatus::ExpiredGracePeriod => "expired_grace_period",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "created" => Some(SubscriptionStatus::Created),
            "authenticated" => Some(SubscriptionStatus::Authenticated),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            "unpaid" => Some(SubscriptionStatus::Unpaid),
            "halted" => Some(SubscriptionStatus::Halted),
            "paused" => Some(SubscriptionStatus::Paused),
            "completed" => Some(SubscriptionStatus::Completed),
            "expired_grace_period" => Some(SubscriptionStatus::ExpiredGracePeriod),
            _ => None,
        }
    }

    /// Maps a status string as the provider reports it. Razorpay uses
    /// `pending` for a subscription whose latest charge failed, which is our
    /// `past_due`; everything else matches our names.
    pub fn from_provider(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubscriptionStatus::PastDue),
            other => Self::from_str(other),
        }
    }

    /// Statuses the sync job treats as worth polling the provider for.
    pub const LIVE_STATUSES: [SubscriptionStatus; 3] = [
        SubscriptionStatus::Active,
        SubscriptionStatus::PastDue,
        SubscriptionStatus::Authenticated,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Cancelled
                | SubscriptionStatus::Expired
                | SubscriptionStatus::Completed
                | SubscriptionStatus::ExpiredGracePeriod
        )
    }
}

impl Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
