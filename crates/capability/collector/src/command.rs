//! 下行写命令：本地队列、参数组装、最近结果。

use crate::error::CollectorError;
use domain::{Device, NorthboundCommand, NorthboundCommandResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// 每轮最多处理的命令数（本地队列优先）
pub const COMMAND_BATCH: usize = 20;
pub const LOCAL_QUEUE_CAPACITY: usize = 1000;
pub const RECENT_RESULTS_CAPACITY: usize = 100;
pub const LOCAL_SOURCE: &str = "local";

/// 本地写命令队列与执行结果环。
#[derive(Default)]
pub struct CommandQueue {
    pending: Mutex<VecDeque<NorthboundCommand>>,
    recent: Mutex<VecDeque<NorthboundCommandResult>>,
}

impl CommandQueue {
    /// 入队；满时丢弃最旧的命令，返回是否发生丢弃。
    pub fn push(&self, mut command: NorthboundCommand) -> bool {
        if command.source.trim().is_empty() {
            command.source = LOCAL_SOURCE.to_string();
        }
        let mut pending = self.pending.lock();
        let dropped = pending.len() >= LOCAL_QUEUE_CAPACITY;
        if dropped {
            pending.pop_front();
        }
        pending.push_back(command);
        dropped
    }

    pub fn drain(&self, limit: usize) -> Vec<NorthboundCommand> {
        let mut pending = self.pending.lock();
        let take = limit.min(pending.len());
        pending.drain(..take).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn record_result(&self, result: NorthboundCommandResult) {
        let mut recent = self.recent.lock();
        if recent.len() >= RECENT_RESULTS_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(result);
    }

    /// 最近的本地命令结果，最新的在前。
    pub fn recent_results(&self) -> Vec<NorthboundCommandResult> {
        self.recent.lock().iter().rev().cloned().collect()
    }
}

/// 去除首尾空白并校验必填字段。
pub fn normalize_command(command: &NorthboundCommand) -> Result<NorthboundCommand, CollectorError> {
    let normalized = NorthboundCommand {
        request_id: command.request_id.trim().to_string(),
        product_key: command.product_key.trim().to_string(),
        device_key: command.device_key.trim().to_string(),
        field_name: command.field_name.trim().to_string(),
        value: command.value.trim().to_string(),
        source: command.source.trim().to_string(),
    };
    if normalized.product_key.is_empty() || normalized.device_key.is_empty() {
        return Err(CollectorError::InvalidCommand(
            "product_key and device_key are required".to_string(),
        ));
    }
    if normalized.field_name.is_empty() {
        return Err(CollectorError::InvalidCommand(
            "field_name is required".to_string(),
        ));
    }
    Ok(normalized)
}

/// 写调用参数，合并进驱动上下文 config；同时给出两种键名风格。
pub fn command_params(command: &NorthboundCommand, device: &Device) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("func_name".to_string(), "write".to_string());
    params.insert("field_name".to_string(), command.field_name.clone());
    params.insert("value".to_string(), command.value.clone());
    params.insert("product_key".to_string(), command.product_key.clone());
    params.insert("productKey".to_string(), command.product_key.clone());
    params.insert("device_key".to_string(), command.device_key.clone());
    params.insert("deviceKey".to_string(), command.device_key.clone());
    params.insert("device_address".to_string(), device.device_address.clone());
    params
}
