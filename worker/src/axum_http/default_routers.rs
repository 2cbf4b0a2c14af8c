use axum::{http::StatusCode, response::IntoResponse};
use tracing::{info, warn};

pub async fn not_found() -> impl IntoResponse {
    warn!("worker router: no route matched");
    (StatusCode::NOT_FOUND, "NOT_FOUND")
}

pub async fn health_check() -> impl IntoResponse {
    info!("worker router: health check");
    (StatusCode::OK, "OK")
}
