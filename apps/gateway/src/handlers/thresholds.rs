//! 阈值 handlers
//!
//! - GET|POST /api/thresholds
//! - GET|PUT|DELETE /api/thresholds/:id
//! - GET|PUT /api/alarms/repeat-interval
//!
//! 写操作后失效对应设备的阈值缓存。

use crate::AppState;
use crate::handlers::gateway::record_audit;
use crate::utils::response::{bad_request_error, internal_error, not_found_error, ok};
use api_contract::{CacheQuery, RepeatIntervalDto, ThresholdRequest};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use domain::Threshold;

fn to_threshold(id: i64, req: ThresholdRequest) -> Threshold {
    Threshold {
        id,
        device_id: req.device_id,
        field_name: req.field_name.trim().to_string(),
        operator: req.operator.trim().to_string(),
        value: req.value,
        severity: req.severity,
        enabled: req.enabled,
        shielded: req.shielded,
        message: req.message,
    }
}

/// 带 device_id 时只列该设备
pub async fn list_thresholds(
    State(state): State<AppState>,
    Query(query): Query<CacheQuery>,
) -> Response {
    let store = &state.kernel.stores.thresholds;
    let result = match query.device_id {
        Some(device_id) => store.list_device_thresholds(device_id).await,
        None => store.list_thresholds().await,
    };
    match result {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}

pub async fn get_threshold(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kernel.stores.thresholds.get_threshold(id).await {
        Ok(Some(threshold)) => ok(threshold),
        Ok(None) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

pub async fn create_threshold(
    State(state): State<AppState>,
    Json(req): Json<ThresholdRequest>,
) -> Response {
    if let Err(message) = req.validate() {
        return bad_request_error(message);
    }
    match state.kernel.stores.devices.get_device(req.device_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return bad_request_error(format!("device {} not found", req.device_id)),
        Err(err) => return internal_error(err),
    }
    match state
        .kernel
        .stores
        .thresholds
        .create_threshold(to_threshold(0, req))
        .await
    {
        Ok(threshold) => {
            state.kernel.thresholds.invalidate_device(threshold.device_id);
            ok(threshold)
        }
        Err(err) => internal_error(err),
    }
}

pub async fn update_threshold(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ThresholdRequest>,
) -> Response {
    if let Err(message) = req.validate() {
        return bad_request_error(message);
    }
    let store = &state.kernel.stores.thresholds;
    let previous = match store.get_threshold(id).await {
        Ok(Some(threshold)) => threshold,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    };
    let threshold = to_threshold(id, req);
    match store.update_threshold(threshold.clone()).await {
        Ok(true) => {
            state.kernel.thresholds.invalidate_device(previous.device_id);
            state.kernel.thresholds.invalidate_device(threshold.device_id);
            ok(threshold)
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

pub async fn delete_threshold(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let store = &state.kernel.stores.thresholds;
    let previous = match store.get_threshold(id).await {
        Ok(Some(threshold)) => threshold,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    };
    match store.delete_threshold(id).await {
        Ok(true) => {
            state.kernel.thresholds.invalidate_device(previous.device_id);
            ok(serde_json::json!({ "deleted": id }))
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

pub async fn get_repeat_interval(State(state): State<AppState>) -> Response {
    let interval = state.kernel.datapath.repeat_interval().await;
    ok(RepeatIntervalDto {
        seconds: interval.as_secs() as i64,
    })
}

pub async fn set_repeat_interval(
    State(state): State<AppState>,
    Json(req): Json<RepeatIntervalDto>,
) -> Response {
    if req.seconds <= 0 {
        return bad_request_error("seconds must be positive");
    }
    let gateway = &state.kernel.stores.gateway;
    let mut config = match gateway.get_gateway_config().await {
        Ok(config) => config,
        Err(err) => return internal_error(err),
    };
    let previous = config.alarm_repeat_interval_seconds;
    config.alarm_repeat_interval_seconds = req.seconds;
    if let Err(err) = gateway.update_gateway_config(&config).await {
        return internal_error(err);
    }
    state.kernel.datapath.invalidate_repeat_interval();
    if previous != req.seconds {
        record_audit(
            &state,
            "gateway.alarm_repeat_interval_seconds",
            previous.to_string(),
            req.seconds.to_string(),
            "api",
        )
        .await;
    }
    ok(req)
}
