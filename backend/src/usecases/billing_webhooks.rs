use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use crates::{
    domain::{
        entities::{jobs::InsertJobEntity, processed_webhooks::InsertProcessedWebhookEntity},
        repositories::{jobs::JobRepository, webhooks::BillingWebhookRepository},
        value_objects::{
            enums::{
                job_types::JobType, payment_statuses::PaymentStatus,
                webhook_events::WebhookEventKind,
            },
            jobs::WebhookRetryPayload,
            webhooks::{NewPaymentRecord, WebhookApplyOutcome, WebhookMutation, WebhookOutcome},
        },
    },
    payments::razorpay_client::{BillingEvent, RazorpayPayment},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::usecases::gateway::BillingGateway;

/// Delay before the first queued replay of a failed webhook.
const WEBHOOK_RETRY_DELAY_MS: i64 = 1000;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type WebhookResult<T> = std::result::Result<T, WebhookError>;

pub struct WebhookUseCase<W, J, G>
where
    W: BillingWebhookRepository + Send + Sync + 'static,
    J: JobRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    webhook_repo: Arc<W>,
    job_repo: Arc<J>,
    gateway: Arc<G>,
}

impl<W, J, G> WebhookUseCase<W, J, G>
where
    W: BillingWebhookRepository + Send + Sync + 'static,
    J: JobRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(webhook_repo: Arc<W>, job_repo: Arc<J>, gateway: Arc<G>) -> Self {
        Self {
            webhook_repo,
            job_repo,
            gateway,
        }
    }

    /// HTTP entry point: verifies the signature over the raw body, then
    /// processes the event. Signature failures reject the request before any
    /// processing; processing failures are queued for replay and reported as
    /// `success=false` in an acknowledged response.
    pub async fn handle_delivery(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> WebhookResult<WebhookOutcome> {
        let event = self
            .gateway
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = ?err, "webhooks: signature verification failed");
                WebhookError::InvalidSignature
            })?;

        self.process_webhook(event).await
    }

    /// Applies one provider event, exactly once in effect. A failure while
    /// applying is converted into a queued `webhook_retry` job and an
    /// acknowledged `success=false` outcome; permanent payload defects still
    /// propagate as errors.
    pub async fn process_webhook(&self, event: BillingEvent) -> WebhookResult<WebhookOutcome> {
        match self.replay_webhook(event.clone()).await {
            Ok(outcome) => Ok(outcome),
            Err(WebhookError::Internal(err)) => {
                self.enqueue_retry(&event, &err).await?;
                Ok(WebhookOutcome::failed(format!(
                    "webhook processing failed, queued for retry: {err}"
                )))
            }
            Err(other) => Err(other),
        }
    }

    /// The replay path for `webhook_retry` jobs: identical processing, but a
    /// failure propagates so the job queue (which owns retries at that
    /// point) can reschedule instead of queueing a second job.
    pub async fn replay_webhook(&self, event: BillingEvent) -> WebhookResult<WebhookOutcome> {
        let webhook_id = event.dedupe_id();
        let event_type = event.event.clone();

        info!(%webhook_id, %event_type, "webhooks: processing event");

        // Cheap pre-check; the ledger's unique index is the real guarantee.
        let already_processed = self
            .webhook_repo
            .find_processed(webhook_id.clone())
            .await
            .map_err(|err| {
                error!(%webhook_id, db_error = ?err, "webhooks: dedup lookup failed");
                WebhookError::Internal(err)
            })?;

        if already_processed.is_some() {
            info!(%webhook_id, "webhooks: duplicate delivery ignored");
            return Ok(WebhookOutcome::ok("duplicate webhook ignored"));
        }

        let Some(kind) = WebhookEventKind::from_event_name(&event_type) else {
            // Unhandled types are acknowledged so the provider stops
            // redelivering; no ledger row is written for them.
            info!(%webhook_id, %event_type, "webhooks: unhandled event type acknowledged");
            return Ok(WebhookOutcome::ok("event type not handled"));
        };

        let mutation = Self::mutation_from_event(kind, &event)?;

        let ledger = InsertProcessedWebhookEntity {
            webhook_id: webhook_id.clone(),
            event_type: event_type.clone(),
            subscription_id: None,
            payment_id: event
                .payload
                .payment
                .as_ref()
                .map(|wrapper| wrapper.entity.id.clone()),
            metadata: json!({
                "account_id": event.account_id,
                "event_created_at": event.created_at,
            }),
            processed_at: Utc::now(),
        };

        match self.webhook_repo.apply_event(ledger, mutation).await {
            Ok(WebhookApplyOutcome::Applied) => {
                info!(%webhook_id, %event_type, "webhooks: event applied");
                Ok(WebhookOutcome::ok("webhook processed"))
            }
            Ok(WebhookApplyOutcome::Duplicate) => {
                info!(%webhook_id, "webhooks: concurrent duplicate collapsed");
                Ok(WebhookOutcome::ok("duplicate webhook ignored"))
            }
            Err(err) => {
                error!(%webhook_id, %event_type, error = ?err, "webhooks: apply failed");
                Err(WebhookError::Internal(err))
            }
        }
    }

    async fn enqueue_retry(&self, event: &BillingEvent, cause: &anyhow::Error) -> WebhookResult<()> {
        let payload = WebhookRetryPayload {
            event: serde_json::to_value(event).map_err(anyhow::Error::from)?,
            error: Some(cause.to_string()),
        };

        let job = InsertJobEntity::deferred(
            JobType::WebhookRetry,
            serde_json::to_value(&payload).map_err(anyhow::Error::from)?,
            chrono::Duration::milliseconds(WEBHOOK_RETRY_DELAY_MS),
            Some(cause.to_string()),
        );

        let job_id = self.job_repo.create_job(job).await.map_err(|err| {
            error!(db_error = ?err, "webhooks: failed to enqueue retry job");
            WebhookError::Internal(err)
        })?;

        info!(%job_id, "webhooks: retry job enqueued");
        Ok(())
    }

    fn subscription_id_of(event: &BillingEvent) -> WebhookResult<String> {
        event
            .payload
            .subscription
            .as_ref()
            .map(|wrapper| wrapper.entity.id.clone())
            .ok_or_else(|| {
                WebhookError::MalformedPayload(format!(
                    "{} event without subscription entity",
                    event.event
                ))
            })
    }

    fn period_bound(seconds: Option<i64>) -> Option<DateTime<Utc>> {
        seconds.and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    fn payment_record(payment: &RazorpayPayment, status: PaymentStatus) -> NewPaymentRecord {
        NewPaymentRecord {
            provider_payment_id: payment.id.clone(),
            provider_order_id: payment.order_id.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            status,
            method: payment.method.clone(),
            failure_reason: payment.error_description.clone(),
            gateway_data: serde_json::to_value(payment).unwrap_or_default(),
        }
    }

    /// Normalizes the provider payload into the closed mutation enum. A
    /// missing required sub-entity is a payload defect: rejected outright,
    /// never queued for retry.
    fn mutation_from_event(
        kind: WebhookEventKind,
        event: &BillingEvent,
    ) -> WebhookResult<WebhookMutation> {
        let subscription = event.payload.subscription.as_ref().map(|w| &w.entity);
        let payment = event.payload.payment.as_ref().map(|w| &w.entity);

        let mutation = match kind {
            WebhookEventKind::SubscriptionCharged => {
                let provider_subscription_id = Self::subscription_id_of(event)?;
                let payment = payment.ok_or_else(|| {
                    WebhookError::MalformedPayload(
                        "subscription.charged event without payment entity".to_string(),
                    )
                })?;
                let (period_start, period_end) = subscription
                    .map(|sub| {
                        (
                            Self::period_bound(sub.current_start),
                            Self::period_bound(sub.current_end),
                        )
                    })
                    .unwrap_or((None, None));

                WebhookMutation::Charged {
                    provider_subscription_id,
                    period_start,
                    period_end,
                    payment: Self::payment_record(payment, PaymentStatus::Captured),
                }
            }
            WebhookEventKind::SubscriptionAuthenticated => WebhookMutation::Authenticated {
                provider_subscription_id: Self::subscription_id_of(event)?,
            },
            WebhookEventKind::SubscriptionActivated => {
                let provider_subscription_id = Self::subscription_id_of(event)?;
                let (period_start, period_end) = subscription
                    .map(|sub| {
                        (
                            Self::period_bound(sub.current_start),
                            Self::period_bound(sub.current_end),
                        )
                    })
                    .unwrap_or((None, None));

                WebhookMutation::Activated {
                    provider_subscription_id,
                    period_start,
                    period_end,
                }
            }
            WebhookEventKind::SubscriptionCancelled => WebhookMutation::Cancelled {
                provider_subscription_id: Self::subscription_id_of(event)?,
            },
            WebhookEventKind::SubscriptionPaused => WebhookMutation::Paused {
                provider_subscription_id: Self::subscription_id_of(event)?,
            },
            WebhookEventKind::SubscriptionResumed => WebhookMutation::Resumed {
                provider_subscription_id: Self::subscription_id_of(event)?,
            },
            WebhookEventKind::PaymentFailed => {
                let provider_subscription_id = Self::subscription_id_of(event)?;
                WebhookMutation::PaymentFailed {
                    provider_subscription_id,
                    failure_reason: payment.and_then(|p| p.error_description.clone()),
                    payment: payment.map(|p| Self::payment_record(p, PaymentStatus::Failed)),
                }
            }
        };

        Ok(mutation)
    }
}
