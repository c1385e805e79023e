//! HTTP 北向适配器：POST JSON。

use crate::adapter::{NorthboundAdapter, config_object, data_body, pick_int, pick_string};
use crate::error::NorthboundError;
use async_trait::async_trait;
use domain::{AlarmPayload, CollectData};
use parking_lot::RwLock;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct HttpSettings {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

pub struct HttpAdapter {
    name: String,
    settings: RwLock<Option<HttpSettings>>,
}

impl HttpAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: RwLock::new(None),
        }
    }

    fn settings(&self) -> Result<HttpSettings, NorthboundError> {
        self.settings
            .read()
            .clone()
            .ok_or_else(|| NorthboundError::Transport("http adapter not initialized".to_string()))
    }

    async fn post(&self, body: &Value, kind: &str) -> Result<(), NorthboundError> {
        let settings = self.settings()?;
        let mut request = settings
            .client
            .post(&settings.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (key, value) in &settings.headers {
            request = request.header(key.as_str(), value.as_str());
        }
        let response = request
            .body(serde_json::to_vec(body)?)
            .send()
            .await
            .map_err(|err| NorthboundError::Transport(format!("{} request: {}", kind, err)))?;
        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(NorthboundError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NorthboundAdapter for HttpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self, config: &Value) -> Result<(), NorthboundError> {
        let map = config_object(config)?;
        let url = pick_string(&map, &["url"]);
        if url.is_empty() {
            return Err(NorthboundError::InvalidConfig("url is required".to_string()));
        }
        let headers = match map.get("headers") {
            Some(Value::Object(headers)) => headers
                .iter()
                .filter(|(key, _)| !key.trim().is_empty())
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    (key.trim().to_string(), value)
                })
                .collect(),
            _ => Vec::new(),
        };
        let timeout = match pick_int(&map, 0, &["timeout"]) {
            secs if secs > 0 => Duration::from_secs(secs as u64),
            _ => DEFAULT_TIMEOUT,
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| NorthboundError::InvalidConfig(err.to_string()))?;

        info!(target: "gw.northbound", adapter = %self.name, url = %url, "http_adapter_initialized");
        *self.settings.write() = Some(HttpSettings {
            client,
            url,
            headers,
        });
        Ok(())
    }

    async fn send(&self, data: &CollectData) -> Result<(), NorthboundError> {
        self.post(&data_body(data), "data").await
    }

    async fn send_alarm(&self, alarm: &AlarmPayload) -> Result<(), NorthboundError> {
        self.post(&serde_json::to_value(alarm)?, "alarm").await
    }

    async fn close(&self) -> Result<(), NorthboundError> {
        self.settings.write().take();
        Ok(())
    }
}
