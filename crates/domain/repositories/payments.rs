use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;

use crate::domain::{
    entities::payments::PaymentEntity,
    value_objects::enums::payment_statuses::PaymentStatus,
};

/// Payments are inserted by webhook transactions; this trait covers the
/// after-the-fact operations (verification, refunds). Rows are never deleted.
#[async_trait]
#[automock]
pub trait PaymentRepository {
    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: String,
    ) -> Result<Option<PaymentEntity>>;

    async fn update_status_by_provider_payment_id(
        &self,
        provider_payment_id: String,
        status: PaymentStatus,
    ) -> Result<()>;

    /// One transaction: bumps `refund_amount` (monotone, capped by the
    /// charge amount) and flips status to `refunded` once fully covered.
    async fn apply_refund(
        &self,
        provider_payment_id: String,
        amount: i64,
        reason: Option<String>,
        refunded_at: DateTime<Utc>,
    ) -> Result<PaymentEntity>;
}
