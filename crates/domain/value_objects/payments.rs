use anyhow::{Result, bail};

use crate::domain::value_objects::enums::payment_statuses::PaymentStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPlan {
    pub new_refund_amount: i64,
    pub new_status: PaymentStatus,
}

/// Refund arithmetic for one payment row. The running total only grows and
/// can never exceed the charge; the status flips to `refunded` only once the
/// charge is fully covered, otherwise it is left alone.
pub fn plan_refund(
    charge_amount: i64,
    already_refunded: i64,
    refund: i64,
    current_status: PaymentStatus,
) -> Result<RefundPlan> {
    if refund <= 0 {
        bail!("refund amount must be positive, got {refund}");
    }

    let new_refund_amount = already_refunded + refund;
    if new_refund_amount > charge_amount {
        bail!(
            "refund of {refund} would exceed charge amount {charge_amount} (already refunded {already_refunded})"
        );
    }

    let new_status = if new_refund_amount >= charge_amount {
        PaymentStatus::Refunded
    } else {
        current_status
    };

    Ok(RefundPlan {
        new_refund_amount,
        new_status,
    })
}
