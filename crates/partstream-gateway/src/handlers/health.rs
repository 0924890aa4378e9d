//! Health check handler

use crate::{AppState, ServingStatus};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Body of a health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET|POST /grpc.health.v1.Health/Check
///
/// Reports the status last recorded by the health monitor; the store is
/// never contacted here.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let status = state.health.status();
    let http_status = match status {
        ServingStatus::Serving => StatusCode::OK,
        ServingStatus::NotServing => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.as_str().to_string(),
        }),
    )
        .into_response()
}
