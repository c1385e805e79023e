//! 路由定义
//!
//! 集中管理所有管理接口路由，将路径映射到对应的 handlers：
//! - 健康检查：/health
//! - 运行计数：/api/metrics
//! - 采集器：/api/collector/*
//! - 设备与资源：/api/devices/*, /api/resources/*
//! - 驱动：/api/drivers/*
//! - 数据查询：/api/data/*
//! - 阈值与告警：/api/thresholds/*, /api/alarms/*
//! - 北向：/api/northbound/*
//! - 网关配置：/api/gateway/*

use super::AppState;
use super::handlers::*;
use super::middleware::request_context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
};
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// 创建管理接口路由
///
/// `write_timeout` 为单个请求的处理上限，超时返回 408。
pub fn create_router(state: AppState, write_timeout: Duration) -> Router {
    let api = Router::new()
        .route("/metrics", get(get_metrics))
        .route("/collector/status", get(collector_status))
        .route("/collector/start", post(start_collector))
        .route("/collector/stop", post(stop_collector))
        .route("/collector/intervals", get(get_intervals).put(update_intervals))
        .route(
            "/collector/commands",
            get(list_command_results).post(enqueue_command),
        )
        .route("/devices", get(list_devices).post(create_device))
        .route(
            "/devices/:id",
            get(get_device).put(update_device).delete(delete_device),
        )
        .route("/devices/:id/enabled", put(set_device_enabled))
        .route("/resources", get(list_resources).post(create_resource))
        .route("/resources/:id", delete(delete_resource))
        .route("/drivers", get(list_drivers).post(create_driver))
        .route(
            "/drivers/:id",
            get(get_driver).put(update_driver).delete(delete_driver),
        )
        .route(
            "/drivers/upload/:filename",
            post(upload_driver).layer(DefaultBodyLimit::max(MAX_DRIVER_UPLOAD_BYTES)),
        )
        .route("/drivers/:id/download", get(download_driver))
        .route("/data/cache", get(get_cache))
        .route("/data/history", get(get_history))
        .route("/thresholds", get(list_thresholds).post(create_threshold))
        .route(
            "/thresholds/:id",
            get(get_threshold)
                .put(update_threshold)
                .delete(delete_threshold),
        )
        .route("/alarms", get(list_alarms))
        .route(
            "/alarms/repeat-interval",
            get(get_repeat_interval).put(set_repeat_interval),
        )
        .route("/alarms/:id", delete(delete_alarm))
        .route("/alarms/:id/ack", post(acknowledge_alarm))
        .route("/northbound", get(list_northbound).post(create_northbound))
        .route("/northbound/status", get(northbound_status))
        .route("/northbound/reload", post(reload_northbound))
        .route(
            "/northbound/:name",
            put(update_northbound).delete(delete_northbound),
        )
        .route("/northbound/:name/enabled", put(set_northbound_enabled))
        .route("/northbound/:name/reset", post(reset_northbound_breaker))
        .route(
            "/gateway/config",
            get(get_gateway_config).put(update_gateway_config),
        )
        .route("/gateway/audits", get(list_audits));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state)
        .layer(TimeoutLayer::new(write_timeout))
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use crate::kernel::tests::{memory_stores, test_config};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use domain::{CollectData, Device, NorthboundConfig, NorthboundType};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Kernel>) {
        app_with_config(test_config())
    }

    fn app_with_config(config: gw_config::AppConfig) -> (Router, Arc<Kernel>) {
        let kernel = Arc::new(Kernel::new(&config, memory_stores()).expect("kernel"));
        let state = AppState {
            kernel: kernel.clone(),
        };
        (create_router(state, Duration::from_secs(5)), kernel)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seed_device(kernel: &Kernel) -> Device {
        kernel
            .stores
            .devices
            .create_device(Device {
                name: "meter".to_string(),
                product_key: "pk".to_string(),
                device_key: "dk".to_string(),
                enabled: true,
                ..Device::default()
            })
            .await
            .expect("device")
    }

    #[tokio::test]
    async fn health_sets_request_headers() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("x-trace-id"));
    }

    #[tokio::test]
    async fn collector_lifecycle_maps_conflicts() {
        let (app, kernel) = app();
        let (status, body) = call(&app, "POST", "/api/collector/stop", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "COLLECTOR.NOT_RUNNING");

        let (status, _) = call(&app, "POST", "/api/collector/start", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "POST", "/api/collector/start", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "COLLECTOR.ALREADY_RUNNING");

        let (_, body) = call(&app, "GET", "/api/collector/status", None).await;
        assert_eq!(body["data"]["running"], true);
        kernel.collector.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn intervals_update_is_clamped_and_audited() {
        let (app, _) = app();
        let (status, _) = call(
            &app,
            "PUT",
            "/api/collector/intervals",
            Some(json!({"device_sync_interval_ms": 0, "command_poll_interval_ms": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "PUT",
            "/api/collector/intervals",
            Some(json!({"device_sync_interval_ms": 20, "command_poll_interval_ms": 250, "changed_by": "ops"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["device_sync_interval_ms"], 100);
        assert_eq!(body["data"]["command_poll_interval_ms"], 250);

        let (_, body) = call(&app, "GET", "/api/gateway/audits", None).await;
        let audits = body["data"].as_array().expect("audits");
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0]["key"], "collector.command_poll_interval_ms");
        assert_eq!(audits[0]["changed_by"], "ops");
    }

    #[tokio::test]
    async fn threshold_crud_and_validation() {
        let (app, kernel) = app();
        let device = seed_device(&kernel).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/thresholds",
            Some(json!({"device_id": device.id, "field_name": "temperature", "operator": "~", "value": 1.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID.REQUEST");

        let (status, body) = call(
            &app,
            "POST",
            "/api/thresholds",
            Some(json!({"device_id": device.id, "field_name": "temperature", "operator": ">", "value": 40.0})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_i64().expect("id");
        assert_eq!(body["data"]["severity"], "warning");

        let uri = format!("/api/thresholds/{}", id);
        let (status, body) = call(
            &app,
            "PUT",
            &uri,
            Some(json!({"device_id": device.id, "field_name": "temperature", "operator": ">=", "value": 45.0, "shielded": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["shielded"], true);

        let (_, body) = call(&app, "GET", &format!("/api/thresholds?device_id={}", device.id), None).await;
        assert_eq!(body["data"].as_array().expect("list").len(), 1);

        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "RESOURCE.NOT_FOUND");
    }

    #[tokio::test]
    async fn alarm_is_raised_listed_and_acknowledged() {
        let (app, kernel) = app();
        let device = seed_device(&kernel).await;
        call(
            &app,
            "POST",
            "/api/thresholds",
            Some(json!({"device_id": device.id, "field_name": "temperature", "operator": ">", "value": 40.0, "message": "too hot"})),
        )
        .await;

        let data = CollectData::new(device.id, "meter", domain::now_epoch_ms())
            .with_field("temperature", "41.5");
        kernel.datapath.write(&data, true).await;

        let (_, body) = call(&app, "GET", "/api/alarms?acknowledged=false", None).await;
        let alarms = body["data"].as_array().expect("alarms");
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0]["message"], "too hot");
        let id = alarms[0]["id"].as_i64().expect("id");

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/alarms/{}/ack", id),
            Some(json!({"acknowledged_by": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["acknowledged_by"], "alice");

        let (_, body) = call(&app, "GET", "/api/alarms?acknowledged=false", None).await;
        assert!(body["data"].as_array().expect("alarms").is_empty());

        let (status, _) = call(&app, "POST", "/api/alarms/999/ack", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn repeat_interval_round_trips_through_gateway_config() {
        let (app, kernel) = app();
        let (_, body) = call(&app, "GET", "/api/alarms/repeat-interval", None).await;
        assert_eq!(body["data"]["seconds"], 60);

        let (status, _) = call(&app, "PUT", "/api/alarms/repeat-interval", Some(json!({"seconds": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "PUT", "/api/alarms/repeat-interval", Some(json!({"seconds": 5}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(kernel.datapath.repeat_interval().await, Duration::from_secs(5));
        let (_, body) = call(&app, "GET", "/api/gateway/config", None).await;
        assert_eq!(body["data"]["alarm_repeat_interval_seconds"], 5);
    }

    #[tokio::test]
    async fn history_query_rejects_inverted_range() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/api/data/history?start=10&end=5", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = call(&app, "GET", "/api/data/cache", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].as_array().expect("cache").is_empty());
    }

    #[tokio::test]
    async fn unknown_northbound_toggle_is_not_found() {
        let (app, _) = app();
        let (status, _) = call(
            &app,
            "PUT",
            "/api/northbound/missing/enabled",
            Some(json!({"enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, "POST", "/api/northbound/missing/reset", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, "POST", "/api/northbound/reload", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["active"], 0);
    }

    #[tokio::test]
    async fn failed_northbound_enable_is_rejected_and_not_persisted() {
        let (app, kernel) = app();
        kernel
            .stores
            .northbound
            .save_northbound_config(NorthboundConfig {
                id: 0,
                name: "cloud".to_string(),
                kind: NorthboundType::Http,
                enabled: false,
                upload_interval_ms: 0,
                config: json!({}),
            })
            .await
            .expect("save");

        let (status, body) = call(
            &app,
            "PUT",
            "/api/northbound/cloud/enabled",
            Some(json!({"enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID.REQUEST");

        let stored = kernel
            .stores
            .northbound
            .get_northbound_config("cloud")
            .await
            .expect("get")
            .expect("config");
        assert!(!stored.enabled);
        assert!(kernel.dispatcher.status_of("cloud").is_none());
    }

    #[tokio::test]
    async fn northbound_config_is_applied_before_saving() {
        let (app, kernel) = app();
        let (status, _) = call(
            &app,
            "POST",
            "/api/northbound",
            Some(json!({"id": 0, "name": "cloud", "type": "http", "enabled": true, "upload_interval_ms": 0, "config": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = call(&app, "GET", "/api/northbound", None).await;
        assert!(body["data"].as_array().expect("list").is_empty());

        let (status, body) = call(
            &app,
            "POST",
            "/api/northbound",
            Some(json!({"id": 0, "name": " cloud ", "type": "http", "enabled": true, "upload_interval_ms": 0, "config": {"url": "http://127.0.0.1:9/ingest"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "cloud");
        assert!(kernel.dispatcher.status_of("cloud").is_some());

        // 非法更新保留原适配器与原配置
        let (status, _) = call(
            &app,
            "PUT",
            "/api/northbound/cloud",
            Some(json!({"id": 0, "name": "cloud", "type": "http", "enabled": true, "upload_interval_ms": 0, "config": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(kernel.dispatcher.status_of("cloud").is_some());
        let (_, body) = call(&app, "GET", "/api/northbound", None).await;
        assert_eq!(body["data"][0]["config"]["url"], "http://127.0.0.1:9/ingest");

        let (status, _) = call(&app, "DELETE", "/api/northbound/cloud", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(kernel.dispatcher.status_of("cloud").is_none());
        let (status, _) = call(&app, "DELETE", "/api/northbound/cloud", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn device_crud_checks_references() {
        let (app, kernel) = app();
        let device = json!({
            "id": 0,
            "name": "meter",
            "product_key": "pk",
            "device_key": "dk",
            "collect_interval_ms": 1000,
            "timeout_ms": 500,
            "driver_id": 42,
            "resource_id": null,
            "enabled": true,
        });
        let (status, body) = call(&app, "POST", "/api/devices", Some(device.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID.REQUEST");

        let (status, body) = call(
            &app,
            "POST",
            "/api/resources",
            Some(json!({"id": 0, "name": "com1", "type": "serial", "path": "/dev/ttyS1", "enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let resource_id = body["data"]["id"].as_i64().expect("resource id");

        let mut device = device;
        device["driver_id"] = Value::Null;
        device["resource_id"] = json!(resource_id);
        let (status, body) = call(&app, "POST", "/api/devices", Some(device.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_i64().expect("id");
        let uri = format!("/api/devices/{}", id);

        let (status, _) = call(&app, "DELETE", &format!("/api/resources/{}", resource_id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "PUT",
            &format!("{}/enabled", uri),
            Some(json!({"enabled": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["enabled"], false);

        device["name"] = json!("meter-2");
        let (status, body) = call(&app, "PUT", &uri, Some(device)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "meter-2");
        assert_eq!(body["data"]["id"], id);

        let data = CollectData::new(id, "meter-2", domain::now_epoch_ms()).with_field("voltage", "220");
        kernel.datapath.write(&data, false).await;
        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = call(&app, "GET", "/api/data/cache", None).await;
        assert!(body["data"].as_array().expect("cache").is_empty());
    }

    #[tokio::test]
    async fn driver_files_round_trip_through_upload_and_download() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config();
        config.drivers_dir = dir.path().display().to_string();
        let (app, kernel) = app_with_config(config);

        let upload = |name: &str, bytes: &'static [u8]| {
            Request::post(format!("/api/drivers/upload/{}", name))
                .body(Body::from(bytes))
                .expect("request")
        };
        let response = app.clone().oneshot(upload("meter.txt", b"x")).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = app
            .clone()
            .oneshot(upload("meter.wasm", b"\0asm"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(dir.path().join("meter.wasm").is_file());

        let (status, _) = call(
            &app,
            "POST",
            "/api/drivers",
            Some(json!({"id": 0, "name": "other", "file_path": "missing.wasm", "enabled": false, "resource_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "POST",
            "/api/drivers",
            Some(json!({"id": 0, "name": "meter", "file_path": "meter.wasm", "enabled": false, "resource_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_i64().expect("id");

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/drivers/{}/download", id))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[axum::http::header::CONTENT_DISPOSITION].to_str().expect("header").to_string();
        assert!(disposition.contains("meter.wasm"));
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        assert_eq!(&bytes[..], b"\0asm");

        let (status, _) = call(&app, "DELETE", &format!("/api/drivers/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!dir.path().join("meter.wasm").exists());
        assert!(kernel.stores.drivers.list_drivers().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn enabling_a_driver_loads_it_or_rejects_the_change() {
        let (app, kernel) = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/drivers",
            Some(json!({"id": 0, "name": "rtu", "file_path": "builtin:modbus_rtu", "config_schema": "{not json", "enabled": true, "resource_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID.REQUEST");
        assert!(kernel.stores.drivers.list_drivers().await.expect("list").is_empty());

        let (status, body) = call(
            &app,
            "POST",
            "/api/drivers",
            Some(json!({"id": 0, "name": "rtu", "file_path": "builtin:modbus_rtu", "enabled": true, "resource_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_i64().expect("id");
        let manager = kernel.executor.manager().clone();
        assert!(manager.is_loaded(id));

        let uri = format!("/api/drivers/{}", id);
        let (status, _) = call(
            &app,
            "PUT",
            &uri,
            Some(json!({"id": id, "name": "rtu", "file_path": "builtin:modbus_rtu", "config_schema": "{not json", "enabled": true, "resource_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(manager.is_loaded(id));
        let stored = kernel.stores.drivers.get_driver(id).await.expect("get").expect("driver");
        assert!(stored.enabled);
        assert!(stored.config_schema.is_empty());

        let mut device = seed_device(&kernel).await;
        device.driver_id = Some(id);
        kernel.stores.devices.update_device(device).await.expect("update");
        let (status, _) = call(&app, "DELETE", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            "PUT",
            &uri,
            Some(json!({"id": id, "name": "rtu", "file_path": "builtin:modbus_rtu", "enabled": false, "resource_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["enabled"], false);
        assert!(!manager.is_loaded(id));
    }
}
