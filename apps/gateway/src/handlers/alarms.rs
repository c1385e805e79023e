//! 告警日志 handlers
//!
//! - GET /api/alarms?device_id=&acknowledged=&limit=
//! - POST /api/alarms/:id/ack
//! - DELETE /api/alarms/:id

use crate::AppState;
use crate::utils::response::{internal_error, not_found_error, ok};
use api_contract::{AlarmAckRequest, AlarmListQuery};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use gw_storage::AlarmLogQuery;

pub async fn list_alarms(
    State(state): State<AppState>,
    Query(query): Query<AlarmListQuery>,
) -> Response {
    let query = AlarmLogQuery {
        device_id: query.device_id,
        acknowledged: query.acknowledged,
        limit: query.limit.filter(|limit| *limit > 0).unwrap_or(100).min(1000),
    };
    match state.kernel.stores.alarm_logs.list_alarm_logs(&query).await {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}

/// 请求体可省略，确认人默认 `api`
pub async fn acknowledge_alarm(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<AlarmAckRequest>>,
) -> Response {
    let by = body
        .and_then(|Json(req)| req.acknowledged_by)
        .map(|by| by.trim().to_string())
        .filter(|by| !by.is_empty())
        .unwrap_or_else(|| "api".to_string());
    match state
        .kernel
        .stores
        .alarm_logs
        .acknowledge_alarm(id, &by, domain::now_epoch_ms())
        .await
    {
        Ok(true) => ok(serde_json::json!({ "id": id, "acknowledged_by": by })),
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

pub async fn delete_alarm(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kernel.stores.alarm_logs.delete_alarm_log(id).await {
        Ok(true) => ok(serde_json::json!({ "deleted": id })),
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}
