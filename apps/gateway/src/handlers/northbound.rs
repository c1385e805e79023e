//! 北向 handlers
//!
//! - GET|POST /api/northbound
//! - GET /api/northbound/status
//! - PUT|DELETE /api/northbound/:name
//! - PUT /api/northbound/:name/enabled
//! - POST /api/northbound/:name/reset
//! - POST /api/northbound/reload
//!
//! 写操作先让调度器按新配置初始化适配器，成功后才落库。

use crate::AppState;
use crate::utils::response::{
    bad_request_error, internal_error, northbound_error, not_found_error, ok,
};
use api_contract::EnableRequest;
use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};
use domain::NorthboundConfig;
use tracing::{info, warn};

pub async fn list_northbound(State(state): State<AppState>) -> Response {
    match state.kernel.stores.northbound.list_northbound_configs().await {
        Ok(items) => ok(items),
        Err(err) => internal_error(err),
    }
}

pub async fn northbound_status(State(state): State<AppState>) -> Response {
    ok(state.kernel.dispatcher.status())
}

/// 启用时先按配置重建适配器，失败不落库；禁用时丢弃待发数据
pub async fn set_northbound_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<EnableRequest>,
) -> Response {
    let store = &state.kernel.stores.northbound;
    let dispatcher = &state.kernel.dispatcher;
    if req.enabled {
        let mut config = match store.get_northbound_config(&name).await {
            Ok(Some(config)) => config,
            Ok(None) => return not_found_error(),
            Err(err) => return internal_error(err),
        };
        config.enabled = true;
        if let Err(err) = dispatcher.apply_config(&config).await {
            warn!(target: "gw.api", adapter = %name, error = %err, "northbound_enable_failed");
            return northbound_error(err);
        }
    }
    match store.set_northbound_enabled(&name, req.enabled).await {
        Ok(true) => {}
        Ok(false) => return not_found_error(),
        Err(err) => {
            if req.enabled {
                dispatcher.remove(&name).await;
            }
            return internal_error(err);
        }
    }
    if !req.enabled {
        dispatcher.set_enabled(&name, false);
    }
    info!(target: "gw.api", adapter = %name, enabled = req.enabled, "northbound_toggled");
    ok(dispatcher.status_of(&name))
}

pub async fn create_northbound(
    State(state): State<AppState>,
    Json(config): Json<NorthboundConfig>,
) -> Response {
    let name = config.name.trim().to_string();
    save_northbound(&state, name, config).await
}

/// 路径中的名称为准
pub async fn update_northbound(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(config): Json<NorthboundConfig>,
) -> Response {
    match state.kernel.stores.northbound.get_northbound_config(&name).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found_error(),
        Err(err) => return internal_error(err),
    }
    save_northbound(&state, name, config).await
}

async fn save_northbound(state: &AppState, name: String, mut config: NorthboundConfig) -> Response {
    if name.is_empty() {
        return bad_request_error("name is required");
    }
    config.name = name;
    let store = &state.kernel.stores.northbound;
    let previous = match store.get_northbound_config(&config.name).await {
        Ok(previous) => previous,
        Err(err) => return internal_error(err),
    };
    let dispatcher = &state.kernel.dispatcher;
    if let Err(err) = dispatcher.apply_config(&config).await {
        warn!(target: "gw.api", adapter = %config.name, error = %err, "northbound_apply_failed");
        // 恢复原适配器
        if let Some(previous) = previous {
            if let Err(restore) = dispatcher.apply_config(&previous).await {
                warn!(target: "gw.api", adapter = %previous.name, error = %restore, "northbound_restore_failed");
            }
        }
        return northbound_error(err);
    }
    match store.save_northbound_config(config).await {
        Ok(saved) => {
            info!(target: "gw.api", adapter = %saved.name, kind = saved.kind.as_str(), enabled = saved.enabled, "northbound_saved");
            ok(saved)
        }
        Err(err) => internal_error(err),
    }
}

pub async fn delete_northbound(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.kernel.stores.northbound.delete_northbound_config(&name).await {
        Ok(true) => {}
        Ok(false) => return not_found_error(),
        Err(err) => return internal_error(err),
    }
    state.kernel.dispatcher.remove(&name).await;
    info!(target: "gw.api", adapter = %name, "northbound_deleted");
    ok(serde_json::json!({ "name": name }))
}

/// 熔断器复位为 Closed
pub async fn reset_northbound_breaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    if !state.kernel.dispatcher.reset_breaker(&name) {
        return not_found_error();
    }
    info!(target: "gw.api", adapter = %name, "breaker_reset_by_api");
    ok(state.kernel.dispatcher.status_of(&name))
}

pub async fn reload_northbound(State(state): State<AppState>) -> Response {
    match state
        .kernel
        .dispatcher
        .reload_from_configs(state.kernel.stores.northbound.as_ref())
        .await
    {
        Ok(active) => ok(serde_json::json!({ "active": active })),
        Err(err) => internal_error(err),
    }
}
