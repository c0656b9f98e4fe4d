//! Metrics and snapshot endpoint of a zone.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing::error;

use crate::context::ZoneContext;

pub fn router(ctx: ZoneContext) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/snapshot", get(snapshot_handler))
        .with_state(ctx)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_handler(State(ctx): State<ZoneContext>) -> Response {
    ctx.load().await;
    match ctx.metrics().encode() {
        Ok((content_type, buffer)) => ([(header::CONTENT_TYPE, content_type)], buffer).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response()
        }
    }
}

async fn snapshot_handler(State(ctx): State<ZoneContext>) -> impl IntoResponse {
    let snapshot = ctx.zone().lock().await.snapshot();
    Json(snapshot)
}
