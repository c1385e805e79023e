//! 北向分发能力。
//!
//! - `Dispatcher`：每个目的地一个最新值待发槽 + 独立上传周期 + 熔断器，200ms 刷新循环
//! - `CircuitBreaker`：Closed / Open / HalfOpen 三态熔断
//! - 适配器：`http`（POST JSON）、`mqtt`（topic / alarm_topic）、`xunji`（厂商信封 + 属性下发）

mod adapter;
mod breaker;
mod dispatcher;
mod error;
mod http;
mod mqtt;
mod xunji;

pub use adapter::{NorthboundAdapter, new_adapter};
pub use breaker::{BreakerConfig, BreakerPermit, BreakerState, BreakerStats, CircuitBreaker};
pub use dispatcher::{DestinationStatus, Dispatcher, FLUSH_TICK, MIN_UPLOAD_INTERVAL};
pub use error::NorthboundError;
pub use http::HttpAdapter;
pub use mqtt::MqttAdapter;
pub use xunji::{COMMAND_QUEUE_CAP, COMMAND_SOURCE, XunjiAdapter};
