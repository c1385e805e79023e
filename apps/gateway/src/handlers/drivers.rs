//! 驱动 handlers
//!
//! - GET|POST /api/drivers
//! - GET|PUT|DELETE /api/drivers/:id
//! - POST /api/drivers/upload/:filename
//! - GET /api/drivers/:id/download
//!
//! 启用的驱动先加载成功才落库；加载失败返回 400，存储与已加载实例保持原样。

use crate::AppState;
use crate::utils::response::{
    bad_request_error, driver_error, internal_error, not_found_error, ok,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use domain::Driver;
use gw_driver::{BUILTIN_PREFIX, DriverError, DriverManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// 上传文件大小上限
pub const MAX_DRIVER_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn is_builtin(driver: &Driver) -> bool {
    driver.file_path.trim().starts_with(BUILTIN_PREFIX)
}

async fn load(manager: &Arc<DriverManager>, driver: &Driver) -> Result<(), DriverError> {
    let manager = manager.clone();
    let driver = driver.clone();
    tokio::task::spawn_blocking(move || manager.load_driver(&driver))
        .await
        .map_err(|err| DriverError::ExecutionFailed(format!("driver load task failed: {}", err)))?
}

/// 名称必填；插件驱动的文件必须已上传
fn validate_driver(manager: &DriverManager, driver: &Driver) -> Result<(), Response> {
    if driver.name.trim().is_empty() {
        return Err(bad_request_error("name is required"));
    }
    if !is_builtin(driver) {
        let path = manager.resolve_path(driver);
        if !path.is_file() {
            return Err(bad_request_error(format!(
                "driver file {} not found",
                path.display()
            )));
        }
    }
    Ok(())
}

pub async fn list_drivers(State(state): State<AppState>) -> Response {
    match state.kernel.stores.drivers.list_drivers().await {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}

pub async fn get_driver(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.kernel.stores.drivers.get_driver(id).await {
        Ok(Some(driver)) => ok(driver),
        Ok(None) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

/// 先以禁用状态建档取得 id，启用的驱动加载失败时撤销建档
pub async fn create_driver(State(state): State<AppState>, Json(mut driver): Json<Driver>) -> Response {
    let manager = state.kernel.executor.manager();
    driver.id = 0;
    driver.name = driver.name.trim().to_string();
    if let Err(response) = validate_driver(manager, &driver) {
        return response;
    }
    let enabled = driver.enabled;
    driver.enabled = false;
    let store = &state.kernel.stores.drivers;
    let mut created = match store.create_driver(driver).await {
        Ok(created) => created,
        Err(err) => return internal_error(err),
    };
    if enabled {
        created.enabled = true;
        if let Err(err) = load(manager, &created).await {
            warn!(target: "gw.api", driver = %created.name, error = %err, "driver_load_failed");
            if let Err(cleanup) = store.delete_driver(created.id).await {
                warn!(target: "gw.api", driver_id = created.id, error = %cleanup, "driver_cleanup_failed");
            }
            return driver_error(err);
        }
        if let Err(err) = store.update_driver(created.clone()).await {
            manager.unload_driver(created.id);
            return internal_error(err);
        }
    }
    info!(target: "gw.api", driver_id = created.id, driver = %created.name, enabled, "driver_created");
    ok(created)
}

pub async fn update_driver(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut driver): Json<Driver>,
) -> Response {
    let manager = state.kernel.executor.manager();
    driver.id = id;
    driver.name = driver.name.trim().to_string();
    let store = &state.kernel.stores.drivers;
    match store.get_driver(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    }
    if let Err(response) = validate_driver(manager, &driver) {
        return response;
    }
    if driver.enabled {
        // 成功时替换旧实例，失败时旧实例不动
        if let Err(err) = load(manager, &driver).await {
            warn!(target: "gw.api", driver_id = id, error = %err, "driver_load_failed");
            return driver_error(err);
        }
    } else {
        manager.unload_driver(id);
    }
    match store.update_driver(driver.clone()).await {
        Ok(true) => {
            state.kernel.collector.sync_now();
            info!(target: "gw.api", driver_id = id, enabled = driver.enabled, "driver_updated");
            ok(driver)
        }
        Ok(false) => not_found_error(),
        Err(err) => internal_error(err),
    }
}

/// 仍被设备引用的驱动不可删除；插件文件无其他驱动使用时一并删除
pub async fn delete_driver(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let stores = &state.kernel.stores;
    let driver = match stores.drivers.get_driver(id).await {
        Ok(Some(driver)) => driver,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    };
    let devices = match stores.devices.list_devices().await {
        Ok(devices) => devices,
        Err(err) => return internal_error(err),
    };
    if let Some(device) = devices.iter().find(|device| device.driver_id == Some(id)) {
        return bad_request_error(format!("driver {} is used by device {}", id, device.name));
    }
    let manager = state.kernel.executor.manager();
    manager.unload_driver(id);
    match stores.drivers.delete_driver(id).await {
        Ok(true) => {}
        Ok(false) => return not_found_error(),
        Err(err) => return internal_error(err),
    }
    if !is_builtin(&driver) {
        let path = manager.resolve_path(&driver);
        let shared = match stores.drivers.list_drivers().await {
            Ok(others) => others
                .iter()
                .any(|other| !is_builtin(other) && manager.resolve_path(other) == path),
            Err(err) => return internal_error(err),
        };
        if !shared {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(target: "gw.api", path = %path.display(), error = %err, "driver_file_remove_failed");
            }
        }
    }
    info!(target: "gw.api", driver_id = id, driver = %driver.name, "driver_deleted");
    ok(serde_json::json!({ "id": id }))
}

/// 文件名只允许单层 `.wasm`
fn upload_target(manager: &DriverManager, filename: &str) -> Result<PathBuf, Response> {
    let filename = filename.trim();
    let valid = filename.len() > ".wasm".len()
        && filename.ends_with(".wasm")
        && !filename.contains(['/', '\\'])
        && !filename.starts_with('.');
    if !valid {
        return Err(bad_request_error("filename must be a plain *.wasm name"));
    }
    Ok(manager.drivers_dir().join(filename))
}

/// 请求体即插件二进制
pub async fn upload_driver(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    body: Bytes,
) -> Response {
    let manager = state.kernel.executor.manager();
    let path = match upload_target(manager, &filename) {
        Ok(path) => path,
        Err(response) => return response,
    };
    if body.is_empty() {
        return bad_request_error("empty driver file");
    }
    let size = body.len();
    let dir = manager.drivers_dir().to_path_buf();
    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&dir)?;
        std::fs::write(&target, &body)
    })
    .await;
    match written {
        Ok(Ok(())) => {
            info!(target: "gw.api", path = %path.display(), size, "driver_uploaded");
            ok(serde_json::json!({
                "filename": filename.trim(),
                "path": path.display().to_string(),
                "size": size,
            }))
        }
        Ok(Err(err)) => internal_error(err),
        Err(err) => internal_error(err),
    }
}

pub async fn download_driver(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let driver = match state.kernel.stores.drivers.get_driver(id).await {
        Ok(Some(driver)) => driver,
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    };
    if is_builtin(&driver) {
        return not_found_error();
    }
    let path = state.kernel.executor.manager().resolve_path(&driver);
    let target = path.clone();
    let bytes = match tokio::task::spawn_blocking(move || std::fs::read(&target)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => return not_found_error(),
        Ok(Err(err)) => return internal_error(err),
        Err(err) => return internal_error(err),
    };
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.wasm", driver.name));
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}
