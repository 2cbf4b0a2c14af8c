use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::{
    domain::{
        entities::payments::PaymentEntity,
        repositories::payments::PaymentRepository,
        value_objects::{enums::payment_statuses::PaymentStatus, payments::plan_refund},
    },
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::payments},
};

pub struct PaymentPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentRepository for PaymentPostgres {
    async fn find_by_provider_payment_id(
        &self,
        provider_payment_id: String,
    ) -> Result<Option<PaymentEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let payment = payments::table
            .filter(payments::provider_payment_id.eq(&provider_payment_id))
            .select(PaymentEntity::as_select())
            .first::<PaymentEntity>(&mut conn)
            .optional()?;

        Ok(payment)
    }

    async fn update_status_by_provider_payment_id(
        &self,
        provider_payment_id: String,
        status: PaymentStatus,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        diesel::update(
            payments::table.filter(payments::provider_payment_id.eq(&provider_payment_id)),
        )
        .set((
            payments::status.eq(status.as_str()),
            payments::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        Ok(())
    }

    async fn apply_refund(
        &self,
        provider_payment_id: String,
        amount: i64,
        reason: Option<String>,
        refunded_at: DateTime<Utc>,
    ) -> Result<PaymentEntity> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let updated = conn.transaction::<PaymentEntity, anyhow::Error, _>(|conn| {
            let payment: PaymentEntity = payments::table
                .filter(payments::provider_payment_id.eq(&provider_payment_id))
                .select(PaymentEntity::as_select())
                .for_update()
                .first::<PaymentEntity>(conn)
                .optional()?
                .ok_or_else(|| anyhow!("no payment with provider id {provider_payment_id}"))?;

            let current_status =
                PaymentStatus::from_str(&payment.status).unwrap_or(PaymentStatus::Captured);
            let plan = plan_refund(payment.amount, payment.refund_amount, amount, current_status)?;

            let updated = diesel::update(payments::table.find(payment.id))
                .set((
                    payments::refund_amount.eq(plan.new_refund_amount),
                    payments::refunded_at.eq(Some(refunded_at)),
                    payments::refund_reason.eq(reason.clone().or(payment.refund_reason.clone())),
                    payments::status.eq(plan.new_status.as_str()),
                    payments::updated_at.eq(refunded_at),
                ))
                .returning(PaymentEntity::as_select())
                .get_result::<PaymentEntity>(conn)?;

            Ok(updated)
        })?;

        Ok(updated)
    }
}
