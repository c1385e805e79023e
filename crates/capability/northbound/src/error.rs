//! 北向错误类型定义

use std::time::Duration;

/// 北向分发错误
#[derive(Debug, thiserror::Error)]
pub enum NorthboundError {
    /// 适配器配置缺失或非法（初始化失败）
    #[error("invalid northbound config: {0}")]
    InvalidConfig(String),

    /// 传输错误（连接、发布、请求发送）
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP 状态码 >= 400
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 目的地未注册
    #[error("northbound adapter not found: {0}")]
    NotFound(String),

    /// 熔断器打开，调用方记录后跳过
    #[error("circuit breaker is open, retry after {}ms", .retry_after.as_millis())]
    CircuitOpen { retry_after: Duration },

    /// 读取北向配置失败
    #[error("storage error: {0}")]
    Storage(String),
}

impl NorthboundError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl From<gw_storage::StorageError> for NorthboundError {
    fn from(err: gw_storage::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
