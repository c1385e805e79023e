//! MQTT 会话与 MQTT 北向适配器。

use crate::adapter::{
    NorthboundAdapter, config_object, data_body, pick_bool, pick_int, pick_string,
};
use crate::error::NorthboundError;
use async_trait::async_trait;
use domain::{AlarmPayload, CollectData};
use parking_lot::RwLock;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, Publish, QoS};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_KEEP_ALIVE_SECS: i64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: i64 = 10;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// 解析 broker 地址：`tcp://host:port`、`mqtt://host`、`host:port`。
pub(crate) fn parse_broker(broker: &str) -> Result<(String, u16), NorthboundError> {
    let broker = broker.trim();
    if broker.is_empty() {
        return Err(NorthboundError::InvalidConfig("broker is required".to_string()));
    }
    let rest = match broker.split_once("://") {
        Some((scheme, rest)) => match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => rest,
            other => {
                return Err(NorthboundError::InvalidConfig(format!(
                    "unsupported broker scheme: {}",
                    other
                )));
            }
        },
        None => broker,
    };
    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(NorthboundError::InvalidConfig(format!("invalid broker: {}", broker)));
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| NorthboundError::InvalidConfig(format!("invalid broker port: {}", port)))?;
            if host.is_empty() {
                return Err(NorthboundError::InvalidConfig(format!("invalid broker: {}", broker)));
            }
            Ok((host.to_string(), port))
        }
        None => Ok((authority.to_string(), DEFAULT_PORT)),
    }
}

pub(crate) fn qos_from_i64(qos: i64) -> QoS {
    match qos.clamp(0, 2) {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

/// MQTT 连接参数
#[derive(Debug, Clone)]
pub(crate) struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub qos: QoS,
    pub retain: bool,
}

/// 已连接的 MQTT 会话。
///
/// 事件循环在后台任务中轮询；每次 ConnAck 后重新订阅 `subscriptions`，
/// 收到的 Publish 转发到 `incoming`。
pub(crate) struct MqttSession {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    qos: QoS,
    retain: bool,
    timeout: Duration,
    eventloop: JoinHandle<()>,
}

impl MqttSession {
    pub(crate) async fn connect(
        adapter: &str,
        settings: &MqttSettings,
        subscriptions: Vec<String>,
        incoming: Option<mpsc::Sender<Publish>>,
    ) -> Result<Self, NorthboundError> {
        let mut options =
            MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive.max(MIN_KEEP_ALIVE));
        if !settings.username.is_empty() {
            options.set_credentials(settings.username.clone(), settings.password.clone());
        }
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let (connected_tx, connected_rx) = watch::channel(false);

        let loop_client = client.clone();
        let qos = settings.qos;
        let name = adapter.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let _ = connected_tx.send(true);
                        info!(target: "gw.northbound", adapter = %name, "mqtt_connected");
                        for topic in &subscriptions {
                            if let Err(err) = loop_client.try_subscribe(topic.clone(), qos) {
                                warn!(target: "gw.northbound", adapter = %name, topic = %topic, error = %err, "mqtt_subscribe_failed");
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if let Some(tx) = &incoming {
                            if tx.try_send(publish).is_err() {
                                warn!(target: "gw.northbound", adapter = %name, "mqtt_incoming_dropped");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = connected_tx.send(false);
                        warn!(target: "gw.northbound", adapter = %name, error = %err, "mqtt_eventloop_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let session = Self {
            client,
            connected: connected_rx,
            qos: settings.qos,
            retain: settings.retain,
            timeout: settings.connect_timeout,
            eventloop: handle,
        };
        session.wait_connected().await?;
        Ok(session)
    }

    async fn wait_connected(&self) -> Result<(), NorthboundError> {
        if *self.connected.borrow() {
            return Ok(());
        }
        let mut connected = self.connected.clone();
        match tokio::time::timeout(self.timeout, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(NorthboundError::Transport("mqtt eventloop stopped".to_string())),
            Err(_) => Err(NorthboundError::Transport("mqtt connect timeout".to_string())),
        }
    }

    pub(crate) async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NorthboundError> {
        self.wait_connected().await?;
        match tokio::time::timeout(
            self.timeout,
            self.client.publish(topic, self.qos, self.retain, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(NorthboundError::Transport(err.to_string())),
            Err(_) => Err(NorthboundError::Transport("mqtt publish timeout".to_string())),
        }
    }

    pub(crate) fn close(&self) {
        let _ = self.client.try_disconnect();
        self.eventloop.abort();
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.eventloop.abort();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MqttAdapterConfig {
    pub broker: String,
    pub topic: String,
    pub alarm_topic: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub qos: i64,
    pub retain: bool,
    pub keep_alive_secs: i64,
    pub connect_timeout_secs: i64,
}

impl MqttAdapterConfig {
    pub(crate) fn parse(config: &Value) -> Result<Self, NorthboundError> {
        let map = config_object(config)?;
        let broker = pick_string(&map, &["broker", "server_url", "serverUrl"]);
        if broker.is_empty() {
            return Err(NorthboundError::InvalidConfig("broker is required".to_string()));
        }
        let topic = pick_string(&map, &["topic"]);
        if topic.is_empty() {
            return Err(NorthboundError::InvalidConfig("topic is required".to_string()));
        }
        let mut alarm_topic = pick_string(&map, &["alarm_topic", "alarmTopic"]);
        if alarm_topic.is_empty() {
            alarm_topic = format!("{}/alarm", topic);
        }
        let mut client_id = pick_string(&map, &["client_id", "clientId"]);
        if client_id.is_empty() {
            client_id = format!("gw-mqtt-{}", uuid::Uuid::new_v4().simple());
        }
        let keep_alive_secs = match pick_int(&map, DEFAULT_KEEP_ALIVE_SECS, &["keep_alive", "keepAlive"]) {
            secs if secs > 0 => secs,
            _ => DEFAULT_KEEP_ALIVE_SECS,
        };
        let connect_timeout_secs =
            match pick_int(&map, DEFAULT_CONNECT_TIMEOUT_SECS, &["connect_timeout", "connectTimeout"]) {
                secs if secs > 0 => secs,
                _ => DEFAULT_CONNECT_TIMEOUT_SECS,
            };
        Ok(Self {
            broker,
            topic,
            alarm_topic,
            client_id,
            username: pick_string(&map, &["username"]),
            password: pick_string(&map, &["password"]),
            qos: pick_int(&map, 0, &["qos"]).clamp(0, 2),
            retain: pick_bool(&map, false, &["retain"]),
            keep_alive_secs,
            connect_timeout_secs,
        })
    }

    pub(crate) fn settings(&self) -> Result<MqttSettings, NorthboundError> {
        let (host, port) = parse_broker(&self.broker)?;
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
}

struct MqttState {
    config: MqttAdapterConfig,
    session: Arc<MqttSession>,
}

/// 通用 MQTT 适配器：数据发往 `topic`，告警发往 `alarm_topic`。
pub struct MqttAdapter {
    name: String,
    state: RwLock<Option<MqttState>>,
}

impl MqttAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(None),
        }
    }

    fn current(&self, alarm: bool) -> Result<(Arc<MqttSession>, String), NorthboundError> {
        let guard = self.state.read();
        let state = guard
            .as_ref()
            .ok_or_else(|| NorthboundError::Transport("mqtt adapter not initialized".to_string()))?;
        let topic = if alarm {
            state.config.alarm_topic.clone()
        } else {
            state.config.topic.clone()
        };
        Ok((state.session.clone(), topic))
    }
}

#[async_trait]
impl NorthboundAdapter for MqttAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &Value) -> Result<(), NorthboundError> {
        let config = MqttAdapterConfig::parse(config)?;
        let settings = config.settings()?;
        let session = MqttSession::connect(&self.name, &settings, Vec::new(), None).await?;
        info!(
            target: "gw.northbound",
            adapter = %self.name,
            broker = %config.broker,
            topic = %config.topic,
            "mqtt_adapter_initialized"
        );
        let previous = self.state.write().replace(MqttState {
            config,
            session: Arc::new(session),
        });
        if let Some(previous) = previous {
            previous.session.close();
        }
        Ok(())
    }

    async fn send(&self, data: &CollectData) -> Result<(), NorthboundError> {
        let (session, topic) = self.current(false)?;
        session
            .publish(&topic, serde_json::to_vec(&data_body(data))?)
            .await
    }

    async fn send_alarm(&self, alarm: &AlarmPayload) -> Result<(), NorthboundError> {
        let (session, topic) = self.current(true)?;
        session.publish(&topic, serde_json::to_vec(alarm)?).await
    }

    async fn close(&self) -> Result<(), NorthboundError> {
        if let Some(state) = self.state.write().take() {
            state.session.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broker_forms() {
        assert_eq!(
            parse_broker("tcp://10.0.0.2:1884").expect("broker"),
            ("10.0.0.2".to_string(), 1884)
        );
        assert_eq!(
            parse_broker("broker.local").expect("broker"),
            ("broker.local".to_string(), 1883)
        );
        assert_eq!(
            parse_broker("mqtt://broker.local:1883/").expect("broker"),
            ("broker.local".to_string(), 1883)
        );
        assert!(parse_broker("ssl://broker.local:8883").is_err());
        assert!(parse_broker("tcp://:1883").is_err());
    }

    #[test]
    fn config_defaults() {
        let config = MqttAdapterConfig::parse(&json!({
            "broker": "127.0.0.1",
            "topic": "gw/data",
            "qos": 7
        }))
        .expect("config");
        assert_eq!(config.alarm_topic, "gw/data/alarm");
        assert_eq!(config.qos, 2);
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.connect_timeout_secs, 10);
        assert!(config.client_id.starts_with("gw-mqtt-"));
    }

    #[test]
    fn missing_topic_is_rejected() {
        let err = MqttAdapterConfig::parse(&json!({"broker": "127.0.0.1"})).unwrap_err();
        assert!(err.to_string().contains("topic is required"));
        let err = MqttAdapterConfig::parse(&json!({"topic": "t"})).unwrap_err();
        assert!(err.to_string().contains("broker is required"));
    }
}
