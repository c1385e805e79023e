//! 驱动错误类型定义

/// 驱动执行错误
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// 驱动不存在（数据库或内置注册表中均找不到）
    #[error("driver not found: {0}")]
    NotFound(String),

    /// 驱动未加载
    #[error("driver not loaded: {0}")]
    NotLoaded(i64),

    /// 插件无输出
    #[error("plugin returned empty output{}", fmt_detail(.0))]
    PluginEmptyOutput(String),

    /// 插件输出无法解析
    #[error("driver output invalid: {0}")]
    BadOutput(String),

    /// 调用超时
    #[error("driver execution timeout")]
    DriverTimeout,

    /// 调用被取消
    #[error("driver execution canceled")]
    Canceled,

    /// 执行失败（插件报错、设备忙、驱动返回 success=false）
    #[error("driver execution failed: {0}")]
    ExecutionFailed(String),

    /// 资源打开失败（串口打开、TCP 建连）
    #[error("resource open failed: {0}")]
    ResourceOpen(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// WASM 运行时错误
    #[error("wasm error: {0}")]
    Wasm(String),

    /// 配置错误
    #[error("invalid driver config: {0}")]
    InvalidConfig(String),

    /// 存储错误
    #[error("storage error: {0}")]
    Storage(String),
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}

impl DriverError {
    /// 是否为资源打开类错误（采集调度据此做退避）
    pub fn is_resource_open(&self) -> bool {
        matches!(self, Self::ResourceOpen(_))
    }
}

impl From<gw_storage::StorageError> for DriverError {
    fn from(err: gw_storage::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
