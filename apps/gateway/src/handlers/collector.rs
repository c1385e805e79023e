//! 采集器 handlers
//!
//! - GET /api/collector/status
//! - POST /api/collector/start
//! - POST /api/collector/stop
//! - GET|PUT /api/collector/intervals
//! - GET|POST /api/collector/commands

use crate::AppState;
use crate::handlers::gateway::record_audit;
use crate::utils::response::{bad_request_error, collector_error, ok};
use api_contract::{
    CollectorIntervalsDto, CollectorIntervalsUpdate, CollectorStatusDto, WriteCommandRequest,
};
use axum::{
    Json,
    extract::State,
    response::Response,
};
use domain::NorthboundCommand;
use gw_collector::{LOCAL_SOURCE, RuntimeIntervals};
use std::time::Duration;
use tracing::info;

fn intervals_dto(intervals: RuntimeIntervals) -> CollectorIntervalsDto {
    CollectorIntervalsDto {
        device_sync_interval_ms: intervals.device_sync.as_millis() as u64,
        command_poll_interval_ms: intervals.command_poll.as_millis() as u64,
    }
}

pub async fn collector_status(State(state): State<AppState>) -> Response {
    let collector = &state.kernel.collector;
    let intervals = collector.get_runtime_intervals();
    ok(CollectorStatusDto {
        running: collector.is_running().await,
        active_devices: collector.active_devices().len(),
        device_sync_interval_ms: intervals.device_sync.as_millis() as u64,
        command_poll_interval_ms: intervals.command_poll.as_millis() as u64,
    })
}

pub async fn start_collector(State(state): State<AppState>) -> Response {
    match state.kernel.collector.start().await {
        Ok(()) => {
            info!(target: "gw.api", "collector_started_by_api");
            ok(serde_json::json!({ "running": true }))
        }
        Err(err) => collector_error(err),
    }
}

pub async fn stop_collector(State(state): State<AppState>) -> Response {
    match state.kernel.collector.stop().await {
        Ok(()) => {
            info!(target: "gw.api", "collector_stopped_by_api");
            ok(serde_json::json!({ "running": false }))
        }
        Err(err) => collector_error(err),
    }
}

pub async fn get_intervals(State(state): State<AppState>) -> Response {
    ok(intervals_dto(state.kernel.collector.get_runtime_intervals()))
}

/// 更新间隔（下限 100ms），每个变化的值写一条审计
pub async fn update_intervals(
    State(state): State<AppState>,
    Json(req): Json<CollectorIntervalsUpdate>,
) -> Response {
    let device_sync = req.device_sync_interval_ms.unwrap_or(0);
    let command_poll = req.command_poll_interval_ms.unwrap_or(0);
    if device_sync == 0 && command_poll == 0 {
        return bad_request_error("no interval provided");
    }
    let collector = &state.kernel.collector;
    let before = collector.get_runtime_intervals();
    let after = collector.set_runtime_intervals(
        Duration::from_millis(device_sync),
        Duration::from_millis(command_poll),
    );
    let changed_by = req.changed_by.as_deref().unwrap_or("api");
    if before.device_sync != after.device_sync {
        record_audit(
            &state,
            "collector.device_sync_interval_ms",
            before.device_sync.as_millis().to_string(),
            after.device_sync.as_millis().to_string(),
            changed_by,
        )
        .await;
    }
    if before.command_poll != after.command_poll {
        record_audit(
            &state,
            "collector.command_poll_interval_ms",
            before.command_poll.as_millis().to_string(),
            after.command_poll.as_millis().to_string(),
            changed_by,
        )
        .await;
    }
    ok(intervals_dto(after))
}

/// 写命令入队，由命令循环执行
pub async fn enqueue_command(
    State(state): State<AppState>,
    Json(req): Json<WriteCommandRequest>,
) -> Response {
    let request_id = req
        .request_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| gw_telemetry::new_request_ids().request_id);
    let command = NorthboundCommand {
        request_id: request_id.clone(),
        product_key: req.product_key,
        device_key: req.device_key,
        field_name: req.field_name,
        value: req.value,
        source: LOCAL_SOURCE.to_string(),
    };
    if let Err(err) = gw_collector::normalize_command(&command) {
        return collector_error(err);
    }
    state.kernel.collector.enqueue_write(command);
    ok(serde_json::json!({ "request_id": request_id }))
}

pub async fn list_command_results(State(state): State<AppState>) -> Response {
    ok(state.kernel.collector.recent_command_results())
}
