//! 历史点位内存缓冲，按追加顺序分配单调 id。

use crate::canonical_device_name;
use crate::throttle::CleanupThrottle;
use domain::{CollectData, DataPoint, ValueType};
use gw_storage::PointQuery;
use parking_lot::Mutex;
use std::collections::VecDeque;

pub struct HistoryBuffer {
    /// 0 表示不限容量
    capacity: usize,
    state: Mutex<BufferState>,
    throttle: CleanupThrottle,
}

struct BufferState {
    rows: VecDeque<DataPoint>,
    next_id: i64,
}

impl HistoryBuffer {
    pub fn new(capacity: usize, throttle: CleanupThrottle) -> Self {
        Self {
            capacity,
            state: Mutex::new(BufferState {
                rows: VecDeque::new(),
                next_id: 1,
            }),
            throttle,
        }
    }

    /// 将一次采集展开为点位追加，返回追加行数。
    pub fn append(&self, data: &CollectData) -> u64 {
        let device_name = canonical_device_name(data.device_id, &data.device_name);
        let points = data
            .fields
            .iter()
            .map(|(field, value)| DataPoint {
                id: 0,
                device_id: data.device_id,
                device_name: device_name.clone(),
                field_name: field.clone(),
                value: value.clone(),
                value_type: ValueType::infer(value),
                collected_at_ms: data.timestamp_ms,
            })
            .collect();
        self.append_points(points)
    }

    /// 追加点位；传入的 id 被忽略并重新分配。
    pub fn append_points(&self, points: Vec<DataPoint>) -> u64 {
        let mut state = self.state.lock();
        let mut appended = 0;
        for mut point in points {
            point.id = state.next_id;
            state.next_id += 1;
            state.rows.push_back(point);
            appended += 1;
        }
        appended
    }

    /// 当前全部行的快照及其最大 id；缓冲为空时返回 None。
    pub fn snapshot(&self) -> Option<(i64, Vec<DataPoint>)> {
        let state = self.state.lock();
        let max_id = state.rows.back()?.id;
        Some((max_id, state.rows.iter().cloned().collect()))
    }

    /// 删除 id ≤ max_id 的行。
    pub fn remove_upto(&self, max_id: i64) -> usize {
        let mut state = self.state.lock();
        let mut removed = 0;
        while state.rows.front().is_some_and(|row| row.id <= max_id) {
            state.rows.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn remove_before(&self, cutoff_ms: i64) -> usize {
        let mut state = self.state.lock();
        let before = state.rows.len();
        state.rows.retain(|row| row.collected_at_ms >= cutoff_ms);
        before - state.rows.len()
    }

    pub fn remove_device(&self, device_id: i64) -> usize {
        let mut state = self.state.lock();
        let before = state.rows.len();
        state.rows.retain(|row| row.device_id != device_id);
        before - state.rows.len()
    }

    /// 按条件筛选（时间倒序，limit > 0 时截断）。
    pub fn query(&self, query: &PointQuery) -> Vec<DataPoint> {
        let state = self.state.lock();
        let mut items: Vec<DataPoint> = state
            .rows
            .iter()
            .filter(|row| query.matches(row.device_id, &row.field_name, row.collected_at_ms))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.collected_at_ms.cmp(&a.collected_at_ms));
        if query.limit > 0 {
            items.truncate(query.limit as usize);
        }
        items
    }

    pub fn maybe_cleanup(&self) -> u64 {
        if self.capacity == 0 || !self.throttle.should_run() {
            return 0;
        }
        self.enforce_capacity()
    }

    /// 从最旧端淘汰直到不超过容量。
    pub fn enforce_capacity(&self) -> u64 {
        if self.capacity == 0 {
            return 0;
        }
        let mut state = self.state.lock();
        let mut evicted = 0;
        while state.rows.len() > self.capacity {
            state.rows.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.state.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().rows.is_empty()
    }
}
