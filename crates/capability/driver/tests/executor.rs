use domain::{Device, Driver, Resource, ResourceType};
use gw_driver::{
    DriverContext, DriverError, DriverExecutor, DriverManager, HostIo, NativeDriver, PluginOutput,
};
use gw_storage::{DriverStore, InMemoryDriverStore, InMemoryResourceStore, ResourceStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type CallLog = Arc<Mutex<Vec<(i64, Instant, Instant)>>>;

/// 记录每次调用的起止时间，读返回固定温度，其它函数回显上下文配置
struct RecordingDriver {
    log: CallLog,
    delay: Duration,
}

impl NativeDriver for RecordingDriver {
    fn init(&mut self, _config: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn call(
        &mut self,
        function: &str,
        input: &[u8],
        _io: &mut HostIo,
    ) -> Result<PluginOutput, DriverError> {
        let ctx: DriverContext =
            serde_json::from_slice(input).map_err(|err| DriverError::BadOutput(err.to_string()))?;
        let started = Instant::now();
        std::thread::sleep(self.delay);
        self.log.lock().push((ctx.device_id, started, Instant::now()));
        let body = match function {
            "handle" => serde_json::json!({
                "success": true,
                "points": [{"field_name": "temperature", "value": 25.5, "rw": "R"}]
            }),
            "fail" => serde_json::json!({"success": false, "error": "sensor offline"}),
            _ => serde_json::json!({"success": true, "data": ctx.config}),
        };
        Ok(PluginOutput {
            rc: 0,
            output: serde_json::to_vec(&body).expect("encode"),
            error: String::new(),
        })
    }

    fn function_exists(&self, _name: &str) -> bool {
        true
    }

    fn functions(&self) -> Vec<String> {
        vec!["handle".to_string(), "write".to_string()]
    }
}

struct Fixture {
    executor: DriverExecutor,
    log: CallLog,
}

async fn fixture(delay: Duration) -> Fixture {
    let manager = Arc::new(DriverManager::new("drivers").expect("manager"));
    let log: CallLog = Arc::new(Mutex::new(Vec::new()));
    let factory_log = log.clone();
    manager.register_builtin("recording", move || {
        Box::new(RecordingDriver {
            log: factory_log.clone(),
            delay,
        }) as Box<dyn NativeDriver>
    });

    let drivers = Arc::new(InMemoryDriverStore::new());
    drivers
        .create_driver(Driver {
            id: 1,
            name: "recording".to_string(),
            file_path: "builtin:recording".to_string(),
            enabled: true,
            ..Driver::default()
        })
        .await
        .expect("driver");
    let resources = Arc::new(InMemoryResourceStore::new());
    resources
        .create_resource(Resource {
            id: 1,
            name: "bus-1".to_string(),
            kind: ResourceType::Serial,
            path: String::new(),
            enabled: true,
        })
        .await
        .expect("resource");

    Fixture {
        executor: DriverExecutor::new(manager, drivers, resources),
        log,
    }
}

fn device(id: i64) -> Device {
    Device {
        id,
        name: format!("D{}", id),
        product_key: "pk".to_string(),
        device_key: format!("dk{}", id),
        driver_id: Some(1),
        resource_id: Some(1),
        timeout_ms: 2_000,
        ..Device::default()
    }
}

#[tokio::test]
async fn collect_data_maps_points() {
    let fixture = fixture(Duration::ZERO).await;
    let cancel = CancellationToken::new();

    let data = fixture
        .executor
        .collect_data(&device(1), &cancel)
        .await
        .expect("collect");

    assert_eq!(data.device_id, 1);
    assert_eq!(data.device_name, "D1");
    assert_eq!(data.product_key, "pk");
    assert_eq!(data.device_key, "dk1");
    assert!(data.timestamp_ms > 0);
    assert_eq!(data.fields.get("temperature").map(String::as_str), Some("25.500000"));
    assert!(fixture.executor.manager().is_loaded(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn calls_on_one_resource_never_overlap() {
    let fixture = fixture(Duration::from_millis(100)).await;
    let cancel = CancellationToken::new();
    let (d1, d2) = (device(1), device(2));

    let started = Instant::now();
    let (a, b) = tokio::join!(
        fixture.executor.collect_data(&d1, &cancel),
        fixture.executor.collect_data(&d2, &cancel)
    );
    a.expect("d1");
    b.expect("d2");

    assert!(started.elapsed() >= Duration::from_millis(200));
    let log = fixture.log.lock().clone();
    assert_eq!(log.len(), 2);
    let (first, second) = if log[0].1 <= log[1].1 {
        (log[0], log[1])
    } else {
        (log[1], log[0])
    };
    assert!(first.2 <= second.1, "calls overlapped: {:?}", log);
}

#[tokio::test]
async fn concurrent_read_of_same_device_is_rejected() {
    let fixture = fixture(Duration::from_millis(50)).await;
    let cancel = CancellationToken::new();
    let d1 = device(1);

    let (a, b) = tokio::join!(
        fixture.executor.collect_data(&d1, &cancel),
        fixture.executor.collect_data(&d1, &cancel)
    );

    let errors: Vec<String> = [a.err(), b.err()]
        .into_iter()
        .flatten()
        .map(|err| err.to_string())
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("device D1 is already being read"));
}

#[tokio::test]
async fn command_params_reach_driver_context() {
    let fixture = fixture(Duration::ZERO).await;
    let cancel = CancellationToken::new();
    let mut params = BTreeMap::new();
    params.insert("field_name".to_string(), "setpoint".to_string());
    params.insert("value".to_string(), "21".to_string());
    params.insert(" ".to_string(), "ignored".to_string());

    let result = fixture
        .executor
        .execute_command(&device(1), "write", &params, &cancel)
        .await
        .expect("command");

    assert_eq!(result.data.get("func_name").map(String::as_str), Some("write"));
    assert_eq!(result.data.get("field_name").map(String::as_str), Some("setpoint"));
    assert_eq!(result.data.get("value").map(String::as_str), Some("21"));
    assert_eq!(result.data.get("device_address").map(String::as_str), Some("1"));
    assert_eq!(result.data.get("baud_rate").map(String::as_str), Some("9600"));
    assert!(!result.data.contains_key(""));
}

#[tokio::test]
async fn driver_failure_is_execution_error() {
    let fixture = fixture(Duration::ZERO).await;
    let cancel = CancellationToken::new();

    let err = fixture
        .executor
        .execute_command(&device(1), "fail", &BTreeMap::new(), &cancel)
        .await
        .expect_err("failure");

    assert!(matches!(err, DriverError::ExecutionFailed(ref msg) if msg == "sensor offline"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_driver_times_out_and_recovers() {
    let fixture = fixture(Duration::from_millis(300)).await;
    let cancel = CancellationToken::new();
    let mut slow = device(1);
    slow.timeout_ms = 50;

    let err = fixture
        .executor
        .collect_data(&slow, &cancel)
        .await
        .expect_err("timeout");
    assert!(matches!(err, DriverError::DriverTimeout));

    let data = fixture
        .executor
        .collect_data(&device(1), &cancel)
        .await
        .expect("next call");
    assert_eq!(data.fields.len(), 1);
}

#[tokio::test]
async fn canceled_token_aborts_call() {
    let fixture = fixture(Duration::from_millis(200)).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = fixture
        .executor
        .collect_data(&device(1), &cancel)
        .await
        .expect_err("canceled");
    assert!(matches!(err, DriverError::Canceled));
}

#[tokio::test]
async fn device_without_driver_is_not_found() {
    let fixture = fixture(Duration::ZERO).await;
    let mut orphan = device(3);
    orphan.driver_id = None;

    let err = fixture
        .executor
        .collect_data(&orphan, &CancellationToken::new())
        .await
        .expect_err("no driver");
    assert!(matches!(err, DriverError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn builtin_modbus_tcp_reads_float_register() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).expect("request");
        assert_eq!(&request[6..], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        let reply = [
            request[0], request[1], 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x41, 0xCC, 0x00,
            0x00,
        ];
        stream.write_all(&reply).expect("reply");
    });

    let manager = Arc::new(DriverManager::new("drivers").expect("manager"));
    let drivers = Arc::new(InMemoryDriverStore::new());
    drivers
        .create_driver(Driver {
            id: 5,
            name: "modbus".to_string(),
            file_path: "builtin:modbus_tcp".to_string(),
            config_schema:
                r#"{"points":[{"field_name":"temperature","address":0,"data_type":"float32"}]}"#
                    .to_string(),
            enabled: true,
            ..Driver::default()
        })
        .await
        .expect("driver");
    let executor = DriverExecutor::new(manager, drivers, Arc::new(InMemoryResourceStore::new()));
    let meter = Device {
        id: 9,
        name: "meter".to_string(),
        driver_type: "modbus_tcp".to_string(),
        ip_address: "127.0.0.1".to_string(),
        port_num: port,
        driver_id: Some(5),
        resource_id: None,
        ..Device::default()
    };

    let data = executor
        .collect_data(&meter, &CancellationToken::new())
        .await
        .expect("collect");
    server.join().expect("server");

    assert_eq!(data.fields.get("temperature").map(String::as_str), Some("25.500000"));
}
