//! XunJi 北向适配器：MQTT 上的厂商信封格式与属性下发。
//!
//! 上行信封：
//! `{id, version:"1.0", sys{ack:0}, method, params{properties, events, subDevices[{identity, properties, events}]}}`
//!
//! 下行订阅 `/sys/{pk}/{dk}/thing/service/property/set`，命令入队（上限 1000，满时丢弃最旧），
//! 执行结果回复到 `.../property/set_reply`。

use crate::adapter::{
    NorthboundAdapter, config_object, field_json_value, pick_bool, pick_int, pick_string,
};
use crate::error::NorthboundError;
use crate::mqtt::{MqttSession, MqttSettings, parse_broker, qos_from_i64};
use async_trait::async_trait;
use domain::{AlarmPayload, CollectData, NorthboundCommand, NorthboundCommandResult, now_epoch_ms};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const COMMAND_QUEUE_CAP: usize = 1000;
pub const COMMAND_SOURCE: &str = "xunji.property.set";
const METHOD_PACK_POST: &str = "thing.event.property.pack.post";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct XunjiConfig {
    pub product_key: String,
    pub device_key: String,
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub topic: String,
    pub alarm_topic: String,
    pub client_id: String,
    pub qos: i64,
    pub retain: bool,
    pub keep_alive_secs: i64,
    pub connect_timeout_secs: i64,
}

impl XunjiConfig {
    pub(crate) fn parse(config: &Value) -> Result<Self, NorthboundError> {
        let map = config_object(config)?;
        let product_key = pick_string(&map, &["productKey", "product_key"]);
        let device_key = pick_string(&map, &["deviceKey", "device_key"]);
        let server_url = pick_string(&map, &["serverUrl", "server_url", "broker"]);
        if product_key.is_empty() {
            return Err(NorthboundError::InvalidConfig("productKey is required".to_string()));
        }
        if device_key.is_empty() {
            return Err(NorthboundError::InvalidConfig("deviceKey is required".to_string()));
        }
        if server_url.is_empty() {
            return Err(NorthboundError::InvalidConfig("serverUrl is required".to_string()));
        }
        let qos = pick_int(&map, 0, &["qos"]);
        if !(0..=2).contains(&qos) {
            return Err(NorthboundError::InvalidConfig(
                "qos must be between 0 and 2".to_string(),
            ));
        }
        let mut topic = pick_string(&map, &["topic"]);
        if topic.is_empty() {
            topic = format!("xunji/{}/{}", product_key, device_key);
        }
        let mut alarm_topic = pick_string(&map, &["alarmTopic", "alarm_topic"]);
        if alarm_topic.is_empty() {
            alarm_topic = format!("{}/alarm", topic);
        }
        let mut client_id = pick_string(&map, &["clientId", "client_id"]);
        if client_id.is_empty() {
            client_id = format!("xunji-{}-{}", device_key, uuid::Uuid::new_v4().simple());
        }
        let keep_alive_secs = match pick_int(&map, 60, &["keepAlive", "keep_alive"]) {
            secs if secs > 0 => secs,
            _ => 60,
        };
        let connect_timeout_secs =
            match pick_int(&map, 10, &["connectTimeout", "connect_timeout", "timeout"]) {
                secs if secs > 0 => secs,
                _ => 10,
            };
        Ok(Self {
            product_key,
            device_key,
            server_url,
            username: pick_string(&map, &["username"]),
            password: pick_string(&map, &["password"]),
            topic,
            alarm_topic,
            client_id,
            qos,
            retain: pick_bool(&map, false, &["retain"]),
            keep_alive_secs,
            connect_timeout_secs,
        })
    }

    fn settings(&self) -> Result<MqttSettings, NorthboundError> {
        let (host, port) = parse_broker(&self.server_url)?;
        Ok(MqttSettings {
            host,
            port,
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: Duration::from_secs(self.keep_alive_secs as u64),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs as u64),
            qos: qos_from_i64(self.qos),
            retain: self.retain,
        })
    }

    fn property_set_topic(&self) -> String {
        format!("/sys/{}/{}/thing/service/property/set", self.product_key, self.device_key)
    }
}

fn first_non_empty<'a>(values: &[&'a str]) -> &'a str {
    values
        .iter()
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .unwrap_or("")
}

fn envelope(id: String, pk: &str, dk: &str, properties: Value, events: Value) -> Value {
    json!({
        "id": id,
        "version": "1.0",
        "sys": { "ack": 0 },
        "method": METHOD_PACK_POST,
        "params": {
            "properties": {},
            "events": {},
            "subDevices": [{
                "identity": { "productKey": pk, "deviceKey": dk },
                "properties": properties,
                "events": events,
            }],
        },
    })
}

/// 数据信封：子设备身份取采集数据，缺省时回落到网关身份。
pub(crate) fn data_envelope(id: String, data: &CollectData, default_pk: &str, default_dk: &str) -> Value {
    let properties: Map<String, Value> = data
        .fields
        .iter()
        .map(|(key, value)| (key.clone(), field_json_value(value)))
        .collect();
    envelope(
        id,
        first_non_empty(&[data.product_key.as_str(), default_pk]),
        first_non_empty(&[data.device_key.as_str(), default_dk]),
        Value::Object(properties),
        json!({}),
    )
}

pub(crate) fn alarm_envelope(
    id: String,
    alarm: &AlarmPayload,
    default_pk: &str,
    default_dk: &str,
    now_ms: i64,
) -> Value {
    let events = json!({
        "alarm": {
            "value": {
                "field_name": alarm.field_name,
                "actual_value": alarm.actual_value,
                "threshold": alarm.threshold,
                "operator": alarm.operator,
                "message": alarm.message,
            },
            "time": now_ms,
        }
    });
    envelope(
        id,
        first_non_empty(&[alarm.product_key.as_str(), default_pk]),
        first_non_empty(&[alarm.device_key.as_str(), default_dk]),
        json!({}),
        events,
    )
}

fn identity_of(value: Option<&Value>) -> (String, String) {
    let Some(Value::Object(identity)) = value else {
        return (String::new(), String::new());
    };
    let pick = |key: &str| {
        identity
            .get(key)
            .and_then(Value::as_str)
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    };
    (pick("productKey"), pick("deviceKey"))
}

fn is_reserved_key(key: &str) -> bool {
    matches!(
        key.to_ascii_lowercase().as_str(),
        "id" | "method"
            | "version"
            | "params"
            | "identity"
            | "properties"
            | "events"
            | "sub_device"
            | "subdevice"
            | "sub_devices"
            | "subdevices"
    )
}

/// 从 params 中提取属性表与子设备身份。
///
/// 依次尝试 `properties`、`sub_device/subDevice`、`sub_devices/subDevices[0]`，
/// 最后把 params 自身的标量键视为属性。
fn command_properties(params: &Map<String, Value>) -> (Map<String, Value>, String, String) {
    let (mut pk, mut dk) = identity_of(params.get("identity"));
    if let Some(Value::Object(properties)) = params.get("properties") {
        return (properties.clone(), pk, dk);
    }
    for key in ["sub_device", "subDevice"] {
        let Some(Value::Object(sub)) = params.get(key) else {
            continue;
        };
        let (sub_pk, sub_dk) = identity_of(sub.get("identity"));
        if !sub_pk.is_empty() {
            pk = sub_pk;
        }
        if !sub_dk.is_empty() {
            dk = sub_dk;
        }
        if let Some(Value::Object(properties)) = sub.get("properties") {
            return (properties.clone(), pk, dk);
        }
    }
    for key in ["sub_devices", "subDevices"] {
        let Some(Value::Array(list)) = params.get(key) else {
            continue;
        };
        let Some(Value::Object(item)) = list.first() else {
            continue;
        };
        let (sub_pk, sub_dk) = identity_of(item.get("identity"));
        if !sub_pk.is_empty() {
            pk = sub_pk;
        }
        if !sub_dk.is_empty() {
            dk = sub_dk;
        }
        if let Some(Value::Object(properties)) = item.get("properties") {
            return (properties.clone(), pk, dk);
        }
    }
    let direct = params
        .iter()
        .filter(|(key, value)| {
            let key = key.trim();
            !key.is_empty()
                && !is_reserved_key(key)
                && !matches!(value, Value::Object(_) | Value::Array(_))
        })
        .map(|(key, value)| (key.trim().to_string(), value.clone()))
        .collect();
    (direct, pk, dk)
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 解析属性设置报文为命令列表（字段名按字典序）。
pub(crate) fn parse_property_set(topic: &str, payload: &[u8]) -> Vec<NorthboundCommand> {
    let parts: Vec<&str> = topic.split('/').filter(|part| !part.is_empty()).collect();
    if parts.len() < 4 || parts[0] != "sys" {
        return Vec::new();
    }
    let (topic_pk, topic_dk) = (parts[1], parts[2]);
    let Ok(Value::Object(request)) = serde_json::from_slice::<Value>(payload) else {
        return Vec::new();
    };
    let request_id = request.get("id").map(stringify).unwrap_or_default();
    let (root_pk, root_dk) = identity_of(request.get("identity"));
    let params = match request.get("params") {
        Some(Value::Object(params)) => params.clone(),
        _ => return Vec::new(),
    };
    let (properties, params_pk, params_dk) = command_properties(&params);
    let pk = first_non_empty(&[root_pk.as_str(), params_pk.as_str(), topic_pk]).to_string();
    let dk = first_non_empty(&[root_dk.as_str(), params_dk.as_str(), topic_dk]).to_string();
    if pk.is_empty() || dk.is_empty() {
        return Vec::new();
    }
    let sorted: BTreeMap<String, &Value> = properties
        .iter()
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), value))
        .collect();
    sorted
        .into_iter()
        .map(|(field_name, value)| NorthboundCommand {
            request_id: request_id.clone(),
            product_key: pk.clone(),
            device_key: dk.clone(),
            field_name,
            value: stringify(value),
            source: COMMAND_SOURCE.to_string(),
        })
        .collect()
}

/// 命令执行结果回复：`(topic, body)`；缺少身份时返回 None。
pub(crate) fn set_reply(
    result: &NorthboundCommandResult,
    config_pk: &str,
    config_dk: &str,
) -> Option<(String, Value)> {
    let pk = first_non_empty(&[config_pk, result.product_key.as_str()]);
    let dk = first_non_empty(&[config_dk, result.device_key.as_str()]);
    if pk.is_empty() || dk.is_empty() {
        return None;
    }
    let code = if result.code == 0 && result.success {
        200
    } else {
        result.code
    };
    let message = if result.message.is_empty() && result.success {
        "success".to_string()
    } else {
        result.message.clone()
    };
    let mut data = Map::new();
    data.insert(result.field_name.clone(), Value::String(result.value.clone()));
    let body = json!({
        "code": code,
        "id": result.request_id,
        "message": message,
        "version": "1.0.0",
        "data": data,
    });
    Some((
        format!("/sys/{}/{}/thing/service/property/set_reply", pk, dk),
        body,
    ))
}

fn enqueue(queue: &Mutex<VecDeque<NorthboundCommand>>, commands: Vec<NorthboundCommand>) -> usize {
    let mut queue = queue.lock();
    let mut dropped = 0;
    for command in commands {
        if queue.len() >= COMMAND_QUEUE_CAP {
            queue.pop_front();
            dropped += 1;
        }
        queue.push_back(command);
    }
    dropped
}

struct XunjiState {
    config: XunjiConfig,
    session: Arc<MqttSession>,
    listener: JoinHandle<()>,
}

pub struct XunjiAdapter {
    name: String,
    state: RwLock<Option<XunjiState>>,
    commands: Arc<Mutex<VecDeque<NorthboundCommand>>>,
    seq: AtomicU64,
}

impl XunjiAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(None),
            commands: Arc::new(Mutex::new(VecDeque::new())),
            seq: AtomicU64::new(0),
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}_{}_{}", prefix, now_epoch_ms(), seq)
    }

    fn current(&self) -> Result<(Arc<MqttSession>, XunjiConfig), NorthboundError> {
        let guard = self.state.read();
        let state = guard
            .as_ref()
            .ok_or_else(|| NorthboundError::Transport("xunji adapter not initialized".to_string()))?;
        Ok((state.session.clone(), state.config.clone()))
    }

    pub fn pending_command_count(&self) -> usize {
        self.commands.lock().len()
    }

    fn shutdown(state: XunjiState) {
        state.listener.abort();
        state.session.close();
    }
}

#[async_trait]
impl NorthboundAdapter for XunjiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &Value) -> Result<(), NorthboundError> {
        let config = XunjiConfig::parse(config)?;
        let settings = config.settings()?;
        let (tx, mut rx) = mpsc::channel(64);
        let session = MqttSession::connect(
            &self.name,
            &settings,
            vec![config.property_set_topic()],
            Some(tx),
        )
        .await?;

        let queue = self.commands.clone();
        let name = self.name.clone();
        let listener = tokio::spawn(async move {
            while let Some(publish) = rx.recv().await {
                let commands = parse_property_set(&publish.topic, &publish.payload);
                if commands.is_empty() {
                    continue;
                }
                let count = commands.len();
                let dropped = enqueue(&queue, commands);
                info!(target: "gw.northbound", adapter = %name, commands = count, dropped, "xunji_commands_queued");
            }
        });

        info!(
            target: "gw.northbound",
            adapter = %self.name,
            broker = %config.server_url,
            topic = %config.topic,
            "xunji_adapter_initialized"
        );
        let previous = self.state.write().replace(XunjiState {
            config,
            session: Arc::new(session),
            listener,
        });
        if let Some(previous) = previous {
            Self::shutdown(previous);
        }
        Ok(())
    }

    async fn send(&self, data: &CollectData) -> Result<(), NorthboundError> {
        let (session, config) = self.current()?;
        let body = data_envelope(self.next_id("msg"), data, &config.product_key, &config.device_key);
        session.publish(&config.topic, serde_json::to_vec(&body)?).await
    }

    async fn send_alarm(&self, alarm: &AlarmPayload) -> Result<(), NorthboundError> {
        let (session, config) = self.current()?;
        let body = alarm_envelope(
            self.next_id("alarm"),
            alarm,
            &config.product_key,
            &config.device_key,
            now_epoch_ms(),
        );
        session
            .publish(&config.alarm_topic, serde_json::to_vec(&body)?)
            .await
    }

    async fn close(&self) -> Result<(), NorthboundError> {
        if let Some(state) = self.state.write().take() {
            Self::shutdown(state);
        }
        self.commands.lock().clear();
        Ok(())
    }

    async fn pull_commands(&self, limit: usize) -> Result<Vec<NorthboundCommand>, NorthboundError> {
        if self.state.read().is_none() {
            return Err(NorthboundError::Transport("xunji adapter not initialized".to_string()));
        }
        let limit = if limit == 0 { 20 } else { limit };
        let mut queue = self.commands.lock();
        let take = limit.min(queue.len());
        Ok(queue.drain(..take).collect())
    }

    async fn report_command_result(
        &self,
        result: &NorthboundCommandResult,
    ) -> Result<(), NorthboundError> {
        let Ok((session, config)) = self.current() else {
            return Ok(());
        };
        let Some((topic, body)) = set_reply(result, &config.product_key, &config.device_key) else {
            warn!(target: "gw.northbound", adapter = %self.name, request_id = %result.request_id, "xunji_reply_without_identity");
            return Ok(());
        };
        session.publish(&topic, serde_json::to_vec(&body)?).await
    }
}
