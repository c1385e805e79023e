//! 统一错误响应
//!
//! HTTP 状态码与错误码一一对应：
//! - 400 `INVALID.REQUEST`（含设备、驱动、北向配置错误）
//! - 404 `RESOURCE.NOT_FOUND`
//! - 409 `COLLECTOR.ALREADY_RUNNING` / `COLLECTOR.NOT_RUNNING`
//! - 500 `INTERNAL.ERROR`

use api_contract::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gw_collector::CollectorError;
use gw_driver::DriverError;
use gw_northbound::NorthboundError;
use serde::Serialize;
use std::fmt::Display;

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

fn error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::error(code, message.into()))).into_response()
}

pub fn bad_request_error(message: impl Into<String>) -> Response {
    error(StatusCode::BAD_REQUEST, "INVALID.REQUEST", message)
}

pub fn not_found_error() -> Response {
    error(StatusCode::NOT_FOUND, "RESOURCE.NOT_FOUND", "not found")
}

/// 存储、驱动、北向等内部错误
pub fn internal_error(err: impl Display) -> Response {
    error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL.ERROR", err.to_string())
}

pub fn collector_error(err: CollectorError) -> Response {
    match err {
        CollectorError::AlreadyRunning => {
            error(StatusCode::CONFLICT, "COLLECTOR.ALREADY_RUNNING", err.to_string())
        }
        CollectorError::NotRunning => {
            error(StatusCode::CONFLICT, "COLLECTOR.NOT_RUNNING", err.to_string())
        }
        CollectorError::InvalidCommand(message) => bad_request_error(message),
        CollectorError::DeviceNotFound(_) => not_found_error(),
        other => internal_error(other),
    }
}

/// 适配器配置错误为 400，其余按内部错误处理
pub fn northbound_error(err: NorthboundError) -> Response {
    match err {
        NorthboundError::InvalidConfig(message) => bad_request_error(message),
        NorthboundError::NotFound(_) => not_found_error(),
        other => internal_error(other),
    }
}

/// 驱动文件缺失或配置/插件不合法为 400
pub fn driver_error(err: DriverError) -> Response {
    match err {
        DriverError::InvalidConfig(_)
        | DriverError::NotFound(_)
        | DriverError::Wasm(_)
        | DriverError::BadOutput(_) => bad_request_error(err.to_string()),
        other => internal_error(other),
    }
}
