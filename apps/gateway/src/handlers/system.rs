//! 健康检查与计数器快照
//!
//! - GET /health
//! - GET /api/metrics

use crate::utils::response::ok;
use axum::{
    Json,
    response::{IntoResponse, Response},
};

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true }))
}

pub async fn get_metrics() -> Response {
    ok(gw_telemetry::metrics().snapshot())
}
