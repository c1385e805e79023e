//! 实时缓存：每个 (device_id, field_name) 仅保留最新值。

use crate::canonical_device_name;
use crate::throttle::CleanupThrottle;
use domain::{CacheEntry, CollectData, SYSTEM_DEVICE_ID, ValueType};
use parking_lot::RwLock;
use std::collections::HashMap;

type CacheKey = (i64, String);

pub struct RealtimeCache {
    /// 0 表示不限容量
    capacity: usize,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    throttle: CleanupThrottle,
}

impl RealtimeCache {
    pub fn new(capacity: usize, throttle: CleanupThrottle) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
            throttle,
        }
    }

    /// 覆盖写入一次采集的全部字段，返回实际写入的字段数。
    ///
    /// 时间戳早于已有条目的字段被忽略。
    pub fn upsert(&self, data: &CollectData) -> u64 {
        let device_name = canonical_device_name(data.device_id, &data.device_name);
        let mut entries = self.entries.write();
        let mut written = 0;
        for (field, value) in &data.fields {
            let key = (data.device_id, field.clone());
            if let Some(existing) = entries.get(&key) {
                if existing.collected_at_ms > data.timestamp_ms {
                    continue;
                }
            }
            entries.insert(
                key,
                CacheEntry {
                    device_id: data.device_id,
                    device_name: device_name.clone(),
                    field_name: field.clone(),
                    value: value.clone(),
                    value_type: ValueType::infer(value),
                    collected_at_ms: data.timestamp_ms,
                },
            );
            written += 1;
        }
        written
    }

    /// 节流后的容量清理，返回淘汰条目数。
    pub fn maybe_cleanup(&self) -> u64 {
        if self.capacity == 0 || !self.throttle.should_run() {
            return 0;
        }
        self.enforce_capacity()
    }

    /// 按采集时间从最旧开始淘汰，直到不超过容量。
    pub fn enforce_capacity(&self) -> u64 {
        if self.capacity == 0 {
            return 0;
        }
        let mut entries = self.entries.write();
        if entries.len() <= self.capacity {
            return 0;
        }
        let excess = entries.len() - self.capacity;
        let mut ordered: Vec<(i64, CacheKey)> = entries
            .iter()
            .map(|(key, entry)| (entry.collected_at_ms, key.clone()))
            .collect();
        ordered.sort();
        for (_, key) in ordered.into_iter().take(excess) {
            entries.remove(&key);
        }
        excess as u64
    }

    pub fn get(&self, device_id: i64, field_name: &str) -> Option<CacheEntry> {
        self.entries
            .read()
            .get(&(device_id, field_name.to_string()))
            .cloned()
    }

    /// 单个设备的全部字段（按字段名排序）。
    pub fn device_entries(&self, device_id: i64) -> Vec<CacheEntry> {
        let mut items: Vec<CacheEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.device_id == device_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.field_name.cmp(&b.field_name));
        items
    }

    /// 全部条目；`include_system` 为 false 时过滤系统设备。
    pub fn list(&self, include_system: bool) -> Vec<CacheEntry> {
        let mut items: Vec<CacheEntry> = self
            .entries
            .read()
            .values()
            .filter(|entry| include_system || entry.device_id != SYSTEM_DEVICE_ID)
            .cloned()
            .collect();
        items.sort_by(|a, b| {
            a.device_id
                .cmp(&b.device_id)
                .then_with(|| a.field_name.cmp(&b.field_name))
        });
        items
    }

    pub fn remove_device(&self, device_id: i64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(id, _), _| *id != device_id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
