//! 驱动上下文与结果信封

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 默认读入口
pub const DEFAULT_FUNCTION: &str = "handle";
/// 内置驱动的写入口
pub const WRITE_FUNCTION: &str = "write";

/// 传给插件的调用上下文（JSON 编码后作为输入）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverContext {
    pub device_id: i64,
    pub device_name: String,
    pub resource_id: i64,
    pub resource_type: String,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub device_config: String,
}

impl DriverContext {
    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// 单个测点
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverPoint {
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub value: serde_json::Value,
    /// R / W / RW
    #[serde(default)]
    pub rw: String,
}

/// 插件输出信封
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub points: Vec<DriverPoint>,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    #[serde(default)]
    pub error: String,
    /// 驱动读取时间（毫秒），0 表示由宿主补当前时间
    #[serde(default)]
    pub timestamp: i64,
}

impl DriverResult {
    pub fn ok(points: Vec<DriverPoint>) -> Self {
        Self {
            success: true,
            points,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            ..Self::default()
        }
    }
}

/// 插件单次调用的原始返回
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
    pub rc: i32,
    pub output: Vec<u8>,
    pub error: String,
}

/// 已加载驱动的运行时信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedDriverInfo {
    pub id: i64,
    pub name: String,
    pub kind: &'static str,
    pub resource_id: i64,
    pub last_active_ms: i64,
    pub exported_functions: Vec<String>,
}
