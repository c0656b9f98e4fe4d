//! HTTP API of the coordinator.

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{error, warn};
use traffic_net::rpc::{
    HeartbeatResponse, LeastLoadedResponse, RegisterRequest, RegisterResponse, RegistryFault,
};

use crate::registry::RegistryError;
use crate::state::CoordinatorState;

/// Build the router with every coordinator route.
pub fn router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/register", post(register_handler))
        .route("/heartbeat", post(heartbeat_handler))
        .route("/nodes", get(nodes_handler))
        .route("/least_loaded", get(least_loaded_handler))
        .with_state(state)
}

/// Router serving only `/metrics`, for a dedicated scrape listener.
pub fn metrics_router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// A registry error rendered as an HTTP response.
struct ApiError(RegistryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RegistryError::NotRegistered(_) => StatusCode::NOT_FOUND,
            RegistryError::NoHealthyTarget => StatusCode::SERVICE_UNAVAILABLE,
            RegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(RegistryFault::from(self.0))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler(State(state): State<CoordinatorState>) -> Response {
    match state.metrics().encode() {
        Ok((content_type, buffer)) => ([(header::CONTENT_TYPE, content_type)], buffer).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn register_handler(
    State(state): State<CoordinatorState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let message = state.register(req).await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { message })))
}

async fn heartbeat_handler(
    State(state): State<CoordinatorState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    match state.heartbeat(&req).await {
        Ok(health) => Ok(Json(HeartbeatResponse { health })),
        Err(e) => {
            warn!(zone = %req.zone, error = %e, "heartbeat rejected");
            Err(e.into())
        }
    }
}

async fn nodes_handler(State(state): State<CoordinatorState>) -> impl IntoResponse {
    Json(state.nodes().await)
}

#[derive(Debug, Default, Deserialize)]
struct LeastLoadedQuery {
    /// Comma-separated zone names.
    #[serde(default)]
    exclude: String,
}

impl LeastLoadedQuery {
    fn excluded(&self) -> Vec<String> {
        self.exclude
            .split(',')
            .map(str::trim)
            .filter(|z| !z.is_empty())
            .map(String::from)
            .collect()
    }
}

async fn least_loaded_handler(
    State(state): State<CoordinatorState>,
    Query(query): Query<LeastLoadedQuery>,
) -> Result<Json<LeastLoadedResponse>, ApiError> {
    let zone = state.least_loaded(&query.excluded()).await?;
    Ok(Json(LeastLoadedResponse { zone }))
}
