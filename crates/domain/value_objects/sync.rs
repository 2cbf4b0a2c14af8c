use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What the reconciler should do to the owning user when it overwrites a
/// subscription status with the provider's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTierAction {
    /// Leave the user alone (past_due keeps pro until grace expiry).
    None,
    /// Point the user at this subscription and make them pro.
    EnsurePro,
    /// Downgrade to free and clear the subscription back-reference.
    Downgrade,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDiscrepancy {
    pub subscription_id: Uuid,
    pub provider_subscription_id: String,
    pub local_status: String,
    pub provider_status: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub subscription_id: Uuid,
    pub provider_subscription_id: String,
    pub error: String,
}

/// Aggregate report of one reconciliation pass. Returned to on-demand
/// callers and logged by the scheduled run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub total_subscriptions: usize,
    pub synced_count: usize,
    pub discrepancies_found: usize,
    pub errors_count: usize,
    pub discrepancies: Vec<SyncDiscrepancy>,
    pub errors: Vec<SyncError>,
    pub grace_period_expired: usize,
}
