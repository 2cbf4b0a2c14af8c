use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use crates::{
    domain::repositories::{subscriptions::SubscriptionRepository, users::UserRepository},
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{subscriptions::SubscriptionPostgres, users::UserPostgres},
    },
    payments::razorpay_client::RazorpayClient,
    reliability::circuit_breaker::CircuitBreaker,
};

use crate::{
    auth::AuthUser,
    axum_http::error_responses::ErrorResponse,
    config::config_model::DotEnvyConfig,
    usecases::{
        gateway::BillingGateway,
        subscriptions::{SubscriptionError, SubscriptionUseCase},
    },
};

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    config: Arc<DotEnvyConfig>,
    breaker: Arc<CircuitBreaker>,
) -> Router {
    let subscription_repository = SubscriptionPostgres::new(Arc::clone(&db_pool));
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let razorpay_client = RazorpayClient::new(
        config.razorpay.key_id.clone(),
        config.razorpay.key_secret.clone(),
        config.razorpay.webhook_secret.clone(),
    );

    let subscription_usecase = SubscriptionUseCase::new(
        Arc::new(subscription_repository),
        Arc::new(user_repository),
        Arc::new(razorpay_client),
        breaker,
        config.razorpay.plan_id.clone(),
    );

    Router::new()
        .route("/current", get(current_subscription))
        .route("/upgrade", post(upgrade))
        .route("/cancel", post(cancel))
        .with_state(Arc::new(subscription_usecase))
}

fn error_response(err: SubscriptionError) -> axum::response::Response {
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

pub async fn current_subscription<S, U, G>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, U, G>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    U: UserRepository + Send + Sync,
    G: BillingGateway + Send + Sync,
{
    match subscription_usecase
        .get_current_subscription(auth.user_id)
        .await
    {
        Ok(subscription) => (StatusCode::OK, Json(subscription)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn upgrade<S, U, G>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, U, G>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    U: UserRepository + Send + Sync,
    G: BillingGateway + Send + Sync,
{
    match subscription_usecase.upgrade(auth.user_id).await {
        Ok(dto) => (StatusCode::CREATED, Json(dto)).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn cancel<S, U, G>(
    State(subscription_usecase): State<Arc<SubscriptionUseCase<S, U, G>>>,
    auth: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync,
    U: UserRepository + Send + Sync,
    G: BillingGateway + Send + Sync,
{
    match subscription_usecase.cancel(auth.user_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}
