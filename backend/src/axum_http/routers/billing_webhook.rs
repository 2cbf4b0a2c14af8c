use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use crates::{
    domain::repositories::{jobs::JobRepository, webhooks::BillingWebhookRepository},
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{jobs::JobPostgres, webhooks::BillingWebhookPostgres},
    },
    payments::razorpay_client::RazorpayClient,
};

use crate::{
    axum_http::error_responses::ErrorResponse,
    config::config_model::DotEnvyConfig,
    usecases::{billing_webhooks::WebhookUseCase, gateway::BillingGateway},
};

pub const SIGNATURE_HEADER: &str = "X-Razorpay-Signature";

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let webhook_repository = BillingWebhookPostgres::new(Arc::clone(&db_pool));
    let job_repository = JobPostgres::new(Arc::clone(&db_pool));
    let razorpay_client = RazorpayClient::new(
        config.razorpay.key_id.clone(),
        config.razorpay.key_secret.clone(),
        config.razorpay.webhook_secret.clone(),
    );

    let webhook_usecase = WebhookUseCase::new(
        Arc::new(webhook_repository),
        Arc::new(job_repository),
        Arc::new(razorpay_client),
    );

    Router::new()
        .route("/razorpay", post(receive))
        .with_state(Arc::new(webhook_usecase))
}

/// The raw body is required for signature verification, so this handler
/// takes `Bytes` and never a typed JSON extractor. A processing failure that
/// was queued for replay still acknowledges with 200 so the provider does
/// not redeliver on its own schedule.
pub async fn receive<W, J, G>(
    State(webhook_usecase): State<Arc<WebhookUseCase<W, J, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    W: BillingWebhookRepository + Send + Sync,
    J: JobRepository + Send + Sync,
    G: BillingGateway + Send + Sync,
{
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                code: StatusCode::BAD_REQUEST.as_u16(),
                message: "missing webhook signature header".to_string(),
            }),
        )
            .into_response();
    };

    match webhook_usecase.handle_delivery(&body, signature).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => {
            let status = err.status_code();
            (
                status,
                Json(ErrorResponse {
                    code: status.as_u16(),
                    message: err.to_string(),
                }),
            )
                .into_response()
        }
    }
}
