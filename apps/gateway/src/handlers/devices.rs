//! 设备与资源 handlers
//!
//! - GET|POST /api/devices
//! - GET|PUT|DELETE /api/devices/:id
//! - PUT /api/devices/:id/enabled
//! - GET|POST /api/resources
//! - DELETE /api/resources/:id
//!
//! 设备变更后立即触发采集器同步，不等下一个同步周期。

use crate::AppState;
use crate::utils::response::{bad_request_error, internal_error, not_found_error, ok};
use api_contract::EnableRequest;
use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};
use domain::{Device, Resource};
use tracing::info;

pub async fn list_devices(State(state): State<AppState>) -> Response {
    match state.kernel.stores.devices.list_devices().await {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}

pub async fn get_device(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kernel.stores.devices.get_device(id).await {
        Ok(Some(device)) => ok(device),
        Ok(None) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

/// 名称必填，引用的驱动与资源必须存在
async fn validate_device(state: &AppState, device: &Device) -> Result<(), Response> {
    if device.name.trim().is_empty() {
        return Err(bad_request_error("name is required"));
    }
    let stores = &state.kernel.stores;
    if let Some(driver_id) = device.driver_id {
        match stores.drivers.get_driver(driver_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(bad_request_error(format!("driver {} not found", driver_id))),
            Err(err) => return Err(internal_error(err)),
        }
    }
    if let Some(resource_id) = device.resource_id {
        match stores.resources.get_resource(resource_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(bad_request_error(format!("resource {} not found", resource_id)));
            }
            Err(err) => return Err(internal_error(err)),
        }
    }
    Ok(())
}

pub async fn create_device(State(state): State<AppState>, Json(mut device): Json<Device>) -> Response {
    device.id = 0;
    device.name = device.name.trim().to_string();
    if let Err(response) = validate_device(&state, &device).await {
        return response;
    }
    match state.kernel.stores.devices.create_device(device).await {
        Ok(device) => {
            info!(target: "gw.api", device_id = device.id, device = %device.name, "device_created");
            state.kernel.collector.sync_now();
            ok(device)
        }
        Err(err) => internal_error(err),
    }
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut device): Json<Device>,
) -> Response {
    device.id = id;
    device.name = device.name.trim().to_string();
    if let Err(response) = validate_device(&state, &device).await {
        return response;
    }
    match state.kernel.stores.devices.update_device(device.clone()).await {
        Ok(true) => {
            state.kernel.thresholds.invalidate_device(id);
            state.kernel.collector.sync_now();
            info!(target: "gw.api", device_id = id, enabled = device.enabled, "device_updated");
            ok(device)
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

pub async fn set_device_enabled(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<EnableRequest>,
) -> Response {
    let store = &state.kernel.stores.devices;
    let mut device = match store.get_device(id).await {
        Ok(Some(device)) => device,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    };
    device.enabled = req.enabled;
    match store.update_device(device.clone()).await {
        Ok(true) => {
            state.kernel.collector.sync_now();
            info!(target: "gw.api", device_id = id, enabled = req.enabled, "device_toggled");
            ok(device)
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

/// 同时清理该设备的缓存、缓冲与告警状态
pub async fn delete_device(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kernel.stores.devices.delete_device(id).await {
        Ok(true) => {
            state.kernel.datapath.remove_device(id);
            state.kernel.collector.sync_now();
            info!(target: "gw.api", device_id = id, "device_deleted");
            ok(serde_json::json!({ "id": id }))
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

pub async fn list_resources(State(state): State<AppState>) -> Response {
    match state.kernel.stores.resources.list_resources().await {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}

pub async fn create_resource(
    State(state): State<AppState>,
    Json(mut resource): Json<Resource>,
) -> Response {
    resource.id = 0;
    resource.name = resource.name.trim().to_string();
    resource.path = resource.path.trim().to_string();
    if resource.name.is_empty() || resource.path.is_empty() {
        return bad_request_error("name and path are required");
    }
    match state.kernel.stores.resources.create_resource(resource).await {
        Ok(resource) => {
            info!(target: "gw.api", resource_id = resource.id, path = %resource.path, "resource_created");
            ok(resource)
        }
        Err(err) => internal_error(err),
    }
}

/// 仍被设备引用的资源不可删除
pub async fn delete_resource(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let devices = match state.kernel.stores.devices.list_devices().await {
        Ok(devices) => devices,
        Err(err) => return internal_error(err),
    };
    if let Some(device) = devices.iter().find(|device| device.resource_id == Some(id)) {
        return bad_request_error(format!("resource {} is used by device {}", id, device.name));
    }
    match state.kernel.stores.resources.delete_resource(id).await {
        Ok(true) => {
            info!(target: "gw.api", resource_id = id, "resource_deleted");
            ok(serde_json::json!({ "id": id }))
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}
