use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use super::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `"healthy"` or `"degraded"`.
    pub status: &'static str,
}

/// Returns 200 once the NAT chain is in place, 503 otherwise.
pub async fn health<S, A>(State(state): State<Arc<AppState<S, A>>>) -> impl IntoResponse {
    if state.is_network_ready() {
        (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "degraded" }),
        )
    }
}
