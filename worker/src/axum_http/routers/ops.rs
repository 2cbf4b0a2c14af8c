use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use crates::{
    domain::{
        entities::jobs::InsertJobEntity,
        repositories::jobs::JobRepository,
        value_objects::{enums::job_types::JobType, jobs::RefundProcessPayload},
    },
    reliability::circuit_breaker::CircuitBreaker,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    config::config_model::DotEnvyConfig, services::job_scheduler::JobScheduler,
    usecases::process_jobs::PendingJobProcessor,
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/ops/sync" \
//     -H "Authorization: Bearer $INTERNAL_OPS_TOKEN"

#[derive(Clone)]
pub struct OpsRouteState {
    config: Arc<DotEnvyConfig>,
    scheduler: Arc<JobScheduler>,
    processor: Arc<dyn PendingJobProcessor>,
    job_repo: Arc<dyn JobRepository + Send + Sync>,
    breaker: Arc<CircuitBreaker>,
}

pub fn routes(
    config: Arc<DotEnvyConfig>,
    scheduler: Arc<JobScheduler>,
    processor: Arc<dyn PendingJobProcessor>,
    job_repo: Arc<dyn JobRepository + Send + Sync>,
    breaker: Arc<CircuitBreaker>,
) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/sync", post(trigger_sync))
        .route("/jobs/drain", post(drain_jobs))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/circuit-breaker/reset", post(reset_circuit_breaker))
        .route("/refunds", post(enqueue_refund))
        .with_state(OpsRouteState {
            config,
            scheduler,
            processor,
            job_repo,
            breaker,
        })
}

pub async fn status(State(state): State<OpsRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    Json(json!({
        "scheduler": state.scheduler.status(),
        "circuit_breaker": state.breaker.stats(),
    }))
    .into_response()
}

pub async fn trigger_sync(State(state): State<OpsRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    info!("ops: manual reconciliation triggered");
    match state.scheduler.run_daily_sync().await {
        Ok(result) => Json(result).into_response(),
        Err(err) => {
            error!(sync_error = ?err, "ops: manual reconciliation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "sync failed").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DrainJobsResponse {
    pub processed: usize,
}

pub async fn drain_jobs(State(state): State<OpsRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    match state.processor.process_pending_jobs().await {
        Ok(processed) => Json(DrainJobsResponse { processed }).into_response(),
        Err(err) => {
            error!(tick_error = ?err, "ops: manual job drain failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "drain failed").into_response()
        }
    }
}

pub async fn start_scheduler(State(state): State<OpsRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let started = state.scheduler.start();
    Json(json!({ "started": started })).into_response()
}

pub async fn stop_scheduler(State(state): State<OpsRouteState>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let stopped = state.scheduler.stop();
    Json(json!({ "stopped": stopped })).into_response()
}

pub async fn reset_circuit_breaker(
    State(state): State<OpsRouteState>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    state.breaker.reset();
    Json(state.breaker.stats()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub provider_payment_id: String,
    pub amount: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundAcceptedResponse {
    pub job_id: Uuid,
}

/// Refunds go through the durable queue rather than calling the provider
/// inline, so a provider outage at request time cannot lose them.
pub async fn enqueue_refund(
    State(state): State<OpsRouteState>,
    headers: HeaderMap,
    Json(payload): Json<RefundRequest>,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }

    let job_payload = RefundProcessPayload {
        provider_payment_id: payload.provider_payment_id.clone(),
        amount: payload.amount,
        reason: payload.reason,
    };

    let job_payload = match serde_json::to_value(&job_payload) {
        Ok(value) => value,
        Err(err) => {
            error!(serialize_error = ?err, "ops: failed to serialize refund payload");
            return (StatusCode::INTERNAL_SERVER_ERROR, "refund not queued").into_response();
        }
    };

    let insert = InsertJobEntity::deferred(
        JobType::RefundProcess,
        job_payload,
        chrono::Duration::zero(),
        None,
    );

    match state.job_repo.create_job(insert).await {
        Ok(job_id) => {
            info!(
                %job_id,
                provider_payment_id = %payload.provider_payment_id,
                "ops: refund queued"
            );
            (StatusCode::ACCEPTED, Json(RefundAcceptedResponse { job_id })).into_response()
        }
        Err(err) => {
            error!(db_error = ?err, "ops: failed to queue refund job");
            (StatusCode::INTERNAL_SERVER_ERROR, "refund not queued").into_response()
        }
    }
}

fn authorize(state: &OpsRouteState, headers: &HeaderMap) -> Result<(), Response> {
    let expected_token = match state.config.ops.internal_token.as_deref() {
        Some(token) => token,
        None => {
            return Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "ops token is not configured",
            )
                .into_response());
        }
    };

    match authorize_bearer(headers, expected_token) {
        Ok(()) => Ok(()),
        Err(status) => Err((status, "unauthorized").into_response()),
    }
}

fn authorize_bearer(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if token == expected_token {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn bearer_token_must_match_exactly() {
        assert!(authorize_bearer(&headers_with("Bearer sekrit"), "sekrit").is_ok());
        assert_eq!(
            authorize_bearer(&headers_with("Bearer wrong"), "sekrit"),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            authorize_bearer(&headers_with("sekrit"), "sekrit"),
            Err(StatusCode::UNAUTHORIZED)
        );
        assert_eq!(
            authorize_bearer(&HeaderMap::new(), "sekrit"),
            Err(StatusCode::UNAUTHORIZED)
        );
    }
}
