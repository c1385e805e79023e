//! 网关配置与运行时审计
//!
//! - GET|PUT /api/gateway/config
//! - GET /api/gateway/audits?limit=

use crate::AppState;
use crate::utils::response::{bad_request_error, internal_error, ok};
use api_contract::{GatewayConfigUpdate, LimitQuery};
use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use domain::RuntimeConfigAudit;
use tracing::warn;

/// 追加审计；失败只记录日志
pub(crate) async fn record_audit(
    state: &AppState,
    key: &str,
    old_value: String,
    new_value: String,
    changed_by: &str,
) {
    let audit = RuntimeConfigAudit {
        id: 0,
        key: key.to_string(),
        old_value,
        new_value,
        changed_by: changed_by.to_string(),
        changed_at_ms: domain::now_epoch_ms(),
    };
    if let Err(err) = state.kernel.stores.audits.append_audit(audit).await {
        warn!(target: "gw.api", key, error = %err, "audit_append_failed");
    }
}

pub async fn get_gateway_config(State(state): State<AppState>) -> Response {
    match state.kernel.stores.gateway.get_gateway_config().await {
        Ok(config) => ok(config),
        Err(err) => internal_error(err),
    }
}

pub async fn update_gateway_config(
    State(state): State<AppState>,
    Json(req): Json<GatewayConfigUpdate>,
) -> Response {
    let current = match state.kernel.stores.gateway.get_gateway_config().await {
        Ok(config) => config,
        Err(err) => return internal_error(err),
    };
    if req.data_retention_days.is_some_and(|days| days <= 0) {
        return bad_request_error("data_retention_days must be positive");
    }
    if req.alarm_repeat_interval_seconds.is_some_and(|secs| secs <= 0) {
        return bad_request_error("alarm_repeat_interval_seconds must be positive");
    }

    let mut next = current.clone();
    let mut changes: Vec<(&str, String, String)> = Vec::new();
    if let Some(name) = req.gateway_name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return bad_request_error("gateway_name required");
        }
        if name != current.gateway_name {
            changes.push(("gateway.gateway_name", current.gateway_name.clone(), name.clone()));
            next.gateway_name = name;
        }
    }
    if let Some(product_key) = req.product_key {
        let product_key = product_key.trim().to_string();
        if product_key != current.product_key {
            changes.push(("gateway.product_key", current.product_key.clone(), product_key.clone()));
            next.product_key = product_key;
        }
    }
    if let Some(device_key) = req.device_key {
        let device_key = device_key.trim().to_string();
        if device_key != current.device_key {
            changes.push(("gateway.device_key", current.device_key.clone(), device_key.clone()));
            next.device_key = device_key;
        }
    }
    if let Some(days) = req.data_retention_days.filter(|days| *days != current.data_retention_days) {
        changes.push((
            "gateway.data_retention_days",
            current.data_retention_days.to_string(),
            days.to_string(),
        ));
        next.data_retention_days = days;
    }
    if let Some(secs) = req
        .alarm_repeat_interval_seconds
        .filter(|secs| *secs != current.alarm_repeat_interval_seconds)
    {
        changes.push((
            "gateway.alarm_repeat_interval_seconds",
            current.alarm_repeat_interval_seconds.to_string(),
            secs.to_string(),
        ));
        next.alarm_repeat_interval_seconds = secs;
    }

    if changes.is_empty() {
        return ok(current);
    }
    if let Err(err) = state.kernel.stores.gateway.update_gateway_config(&next).await {
        return internal_error(err);
    }
    state.kernel.datapath.invalidate_repeat_interval();
    let changed_by = req.changed_by.as_deref().unwrap_or("api");
    for (key, old_value, new_value) in changes {
        record_audit(&state, key, old_value, new_value, changed_by).await;
    }
    ok(next)
}

pub async fn list_audits(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> Response {
    let limit = query.limit.filter(|limit| *limit > 0).unwrap_or(100).min(1000);
    match state.kernel.stores.audits.list_audits(limit).await {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}
