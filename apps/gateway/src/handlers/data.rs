//! 数据查询 handlers
//!
//! - GET /api/data/cache?device_id=
//! - GET /api/data/history?device_id=&field_name=&start=&end=&limit=

use crate::AppState;
use crate::utils::response::{bad_request_error, internal_error, ok};
use api_contract::{CacheQuery, HistoryQuery};
use axum::{
    extract::{Query, State},
    response::Response,
};
use gw_datapath::DataPathError;
use gw_storage::PointQuery;

/// 实时缓存；不带 device_id 时列出全部设备（不含系统设备）
pub async fn get_cache(State(state): State<AppState>, Query(query): Query<CacheQuery>) -> Response {
    ok(state.kernel.datapath.latest(query.device_id))
}

/// 历史查询，合并内存缓冲与历史库
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let filter = match query.validate() {
        Ok(filter) => filter,
        Err(message) => return bad_request_error(message),
    };
    let query = PointQuery {
        device_id: filter.device_id,
        field_name: filter.field_name,
        start_ms: filter.start_ms,
        end_ms: filter.end_ms,
        limit: filter.limit,
    };
    match state.kernel.datapath.query_history(&query).await {
        Ok(points) => ok(points),
        Err(DataPathError::InvalidQuery(message)) => bad_request_error(message),
        Err(err) => internal_error(err),
    }
}
