use async_trait::async_trait;
use domain::{
    AlarmPayload, CollectData, NorthboundCommand, NorthboundCommandResult, NorthboundConfig,
    NorthboundType,
};
use gw_northbound::{BreakerState, Dispatcher, NorthboundAdapter, NorthboundError};
use gw_storage::{InMemoryNorthboundConfigStore, NorthboundConfigStore};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
struct MockAdapter {
    name: String,
    fail: AtomicBool,
    closed: AtomicBool,
    send_calls: AtomicUsize,
    sent: Mutex<Vec<CollectData>>,
    alarms: Mutex<Vec<AlarmPayload>>,
    commands: Mutex<Vec<NorthboundCommand>>,
    results: Mutex<Vec<NorthboundCommandResult>>,
}

impl MockAdapter {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Self::default()
        })
    }

    fn sent(&self) -> Vec<CollectData> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NorthboundAdapter for MockAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, _config: &Value) -> Result<(), NorthboundError> {
        Ok(())
    }

    async fn send(&self, data: &CollectData) -> Result<(), NorthboundError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(NorthboundError::Transport("cloud unreachable".to_string()));
        }
        self.sent.lock().push(data.clone());
        Ok(())
    }

    async fn send_alarm(&self, alarm: &AlarmPayload) -> Result<(), NorthboundError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NorthboundError::Transport("cloud unreachable".to_string()));
        }
        self.alarms.lock().push(alarm.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), NorthboundError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn pull_commands(&self, limit: usize) -> Result<Vec<NorthboundCommand>, NorthboundError> {
        let mut commands = self.commands.lock();
        let take = limit.min(commands.len());
        Ok(commands.drain(..take).collect())
    }

    async fn report_command_result(
        &self,
        result: &NorthboundCommandResult,
    ) -> Result<(), NorthboundError> {
        self.results.lock().push(result.clone());
        Ok(())
    }
}

fn reading(value: &str) -> CollectData {
    CollectData::new(1, "D1", domain::now_epoch_ms()).with_field("temperature", value)
}

fn alarm() -> AlarmPayload {
    AlarmPayload {
        device_id: 1,
        device_name: "D1".to_string(),
        product_key: String::new(),
        device_key: String::new(),
        field_name: "temperature".to_string(),
        actual_value: 41.0,
        threshold: 40.0,
        operator: ">".to_string(),
        severity: "warning".to_string(),
        message: "temperature high".to_string(),
        triggered_at_ms: domain::now_epoch_ms(),
    }
}

#[tokio::test]
async fn pending_slot_keeps_only_latest() {
    let dispatcher = Dispatcher::new();
    let adapter = MockAdapter::new("cloud");
    dispatcher.register("cloud", adapter.clone()).await;

    dispatcher.send_data(&reading("20"));
    dispatcher.send_data(&reading("21"));
    dispatcher.flush_pending().await;

    let sent = adapter.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].fields["temperature"], "21");
    let status = dispatcher.status_of("cloud").expect("status");
    assert!(!status.has_pending);
    assert!(status.last_sent_at_ms.is_some());

    dispatcher.flush_pending().await;
    assert_eq!(adapter.sent().len(), 1);
}

#[tokio::test]
async fn disabling_drops_pending_without_replay() {
    let dispatcher = Dispatcher::new();
    let adapter = MockAdapter::new("cloud");
    dispatcher.register("cloud", adapter.clone()).await;

    dispatcher.send_data(&reading("20"));
    assert!(dispatcher.set_enabled("cloud", false));
    dispatcher.flush_pending().await;
    assert_eq!(adapter.send_calls.load(Ordering::SeqCst), 0);

    assert!(dispatcher.set_enabled("cloud", true));
    dispatcher.flush_pending().await;
    assert_eq!(adapter.send_calls.load(Ordering::SeqCst), 0);
    assert!(!dispatcher.status_of("cloud").expect("status").has_pending);
}

#[tokio::test]
async fn reading_while_disabled_is_sent_after_enable() {
    let dispatcher = Dispatcher::new();
    let adapter = MockAdapter::new("cloud");
    dispatcher.register("cloud", adapter.clone()).await;
    dispatcher.set_enabled("cloud", false);

    dispatcher.send_data(&reading("22"));
    dispatcher.flush_pending().await;
    assert_eq!(adapter.send_calls.load(Ordering::SeqCst), 0);
    assert!(dispatcher.status_of("cloud").expect("status").has_pending);

    assert!(dispatcher.set_enabled("cloud", true));
    dispatcher.flush_pending().await;
    let sent = adapter.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].fields["temperature"], "22");
}

#[tokio::test]
async fn breaker_opens_after_five_failures() {
    let dispatcher = Dispatcher::new();
    let adapter = MockAdapter::new("cloud");
    adapter.fail.store(true, Ordering::SeqCst);
    dispatcher.register("cloud", adapter.clone()).await;

    dispatcher.send_data(&reading("20"));
    for _ in 0..5 {
        dispatcher.flush_pending().await;
    }
    let status = dispatcher.status_of("cloud").expect("status");
    assert_eq!(status.breaker.state, BreakerState::Open);
    assert_eq!(status.breaker.failure_count, 5);

    dispatcher.flush_pending().await;
    assert_eq!(adapter.send_calls.load(Ordering::SeqCst), 5);
    let status = dispatcher.status_of("cloud").expect("status");
    assert!(status.last_sent_at_ms.is_none());
    assert!(status.has_pending);

    let err = dispatcher
        .send_alarm_to("cloud", &alarm())
        .await
        .expect_err("breaker open");
    assert!(err.is_circuit_open());

    assert!(dispatcher.reset_breaker("cloud"));
    assert_eq!(
        dispatcher.status_of("cloud").expect("status").breaker.state,
        BreakerState::Closed
    );
}

#[tokio::test]
async fn interval_is_clamped_and_gates_sends() {
    let dispatcher = Dispatcher::new();
    let adapter = MockAdapter::new("cloud");
    dispatcher.register("cloud", adapter.clone()).await;
    assert!(dispatcher.set_interval("cloud", Duration::from_millis(100)));
    assert_eq!(dispatcher.status_of("cloud").expect("status").interval_ms, 500);

    dispatcher.send_data(&reading("20"));
    dispatcher.flush_pending().await;
    dispatcher.send_data(&reading("21"));
    dispatcher.flush_pending().await;
    assert_eq!(adapter.sent().len(), 1);
    assert!(dispatcher.status_of("cloud").expect("status").has_pending);

    tokio::time::sleep(Duration::from_millis(550)).await;
    dispatcher.flush_pending().await;
    let sent = adapter.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].fields["temperature"], "21");
}

#[tokio::test]
async fn register_closes_previous_adapter() {
    let dispatcher = Dispatcher::new();
    let first = MockAdapter::new("cloud");
    let second = MockAdapter::new("cloud");
    dispatcher.register("cloud", first.clone()).await;
    dispatcher.set_enabled("cloud", false);
    dispatcher.register("cloud", second.clone()).await;

    assert!(first.closed.load(Ordering::SeqCst));
    assert!(!second.closed.load(Ordering::SeqCst));
    assert!(dispatcher.status_of("cloud").expect("status").enabled);

    assert!(dispatcher.remove("cloud").await);
    assert!(second.closed.load(Ordering::SeqCst));
    assert!(dispatcher.is_empty());
}

#[tokio::test]
async fn alarms_go_to_enabled_destinations_immediately() {
    let dispatcher = Dispatcher::new();
    let a = MockAdapter::new("a");
    let b = MockAdapter::new("b");
    dispatcher.register("a", a.clone()).await;
    dispatcher.register("b", b.clone()).await;
    dispatcher.set_enabled("b", false);

    dispatcher.send_alarm(&alarm()).await;
    assert_eq!(a.alarms.lock().len(), 1);
    assert!(b.alarms.lock().is_empty());

    let err = dispatcher
        .send_alarm_to("missing", &alarm())
        .await
        .expect_err("unknown destination");
    assert!(matches!(err, NorthboundError::NotFound(_)));
}

#[tokio::test]
async fn flush_loop_delivers_and_stop_closes() {
    let dispatcher = Dispatcher::new();
    let adapter = MockAdapter::new("cloud");
    dispatcher.register("cloud", adapter.clone()).await;
    dispatcher.start().await;
    dispatcher.start().await;
    assert!(dispatcher.is_running().await);

    dispatcher.send_data(&reading("20"));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(adapter.sent().len(), 1);

    dispatcher.stop().await;
    assert!(!dispatcher.is_running().await);
    assert!(adapter.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn commands_are_reported_to_their_origin() {
    let dispatcher = Dispatcher::new();
    let a = MockAdapter::new("a");
    let b = MockAdapter::new("b");
    a.commands.lock().push(NorthboundCommand {
        request_id: "r1".to_string(),
        product_key: "PK".to_string(),
        device_key: "DK".to_string(),
        field_name: "switch".to_string(),
        value: "1".to_string(),
        source: "test".to_string(),
    });
    dispatcher.register("a", a.clone()).await;
    dispatcher.register("b", b.clone()).await;

    let commands = dispatcher.pull_commands(20).await;
    assert_eq!(commands.len(), 1);
    let result = NorthboundCommandResult::from_command(&commands[0], Ok(()));
    dispatcher.report_command_result(&result).await;

    let reported = a.results.lock().clone();
    assert_eq!(reported.len(), 1);
    assert_eq!(reported[0].code, 200);
    assert!(b.results.lock().is_empty());
}

#[tokio::test]
async fn reload_builds_destinations_from_configs() {
    let store = InMemoryNorthboundConfigStore::new();
    store
        .save_northbound_config(NorthboundConfig {
            id: 0,
            name: "cloud-http".to_string(),
            kind: NorthboundType::Http,
            enabled: true,
            upload_interval_ms: 1000,
            config: json!({"url": "http://127.0.0.1:9/ingest", "headers": {"X-Token": "t"}}),
        })
        .await
        .expect("save");
    store
        .save_northbound_config(NorthboundConfig {
            id: 0,
            name: "broken-http".to_string(),
            kind: NorthboundType::Http,
            enabled: true,
            upload_interval_ms: 1000,
            config: json!({}),
        })
        .await
        .expect("save");
    store
        .save_northbound_config(NorthboundConfig {
            id: 0,
            name: "idle-mqtt".to_string(),
            kind: NorthboundType::Mqtt,
            enabled: false,
            upload_interval_ms: 0,
            config: json!({"broker": "127.0.0.1", "topic": "t"}),
        })
        .await
        .expect("save");

    let dispatcher = Dispatcher::new();
    dispatcher.register("stale", MockAdapter::new("stale")).await;

    let active = dispatcher
        .reload_from_configs(&store)
        .await
        .expect("reload");
    assert_eq!(active, 1);
    assert_eq!(dispatcher.names(), vec!["cloud-http".to_string()]);
    assert_eq!(
        dispatcher.status_of("cloud-http").expect("status").interval_ms,
        1000
    );
}
