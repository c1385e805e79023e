//! 网关自身状态采样，作为系统设备写入数据通路。

use domain::{CollectData, SYSTEM_DEVICE_ID, SYSTEM_DEVICE_NAME};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;
use sysinfo::{Disks, System};

pub const DEFAULT_SYSTEM_STATS_INTERVAL: Duration = Duration::from_secs(60);

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// 单次采样结果；内存单位 MB，磁盘单位 GB，使用率为百分比。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemStats {
    pub cpu_usage: f64,
    pub mem_total: f64,
    pub mem_used: f64,
    pub mem_usage: f64,
    pub mem_available: f64,
    pub disk_total: f64,
    pub disk_used: f64,
    pub disk_usage: f64,
    pub disk_free: f64,
    pub uptime: u64,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
}

impl SystemStats {
    pub fn to_collect_data(&self, timestamp_ms: i64) -> CollectData {
        let fixed = |value: f64| format!("{:.2}", value);
        CollectData::new(SYSTEM_DEVICE_ID, SYSTEM_DEVICE_NAME, timestamp_ms)
            .with_field("cpu_usage", fixed(self.cpu_usage))
            .with_field("mem_total", fixed(self.mem_total))
            .with_field("mem_used", fixed(self.mem_used))
            .with_field("mem_usage", fixed(self.mem_usage))
            .with_field("mem_available", fixed(self.mem_available))
            .with_field("disk_total", fixed(self.disk_total))
            .with_field("disk_used", fixed(self.disk_used))
            .with_field("disk_usage", fixed(self.disk_usage))
            .with_field("disk_free", fixed(self.disk_free))
            .with_field("uptime", self.uptime.to_string())
            .with_field("load_1", fixed(self.load_1))
            .with_field("load_5", fixed(self.load_5))
            .with_field("load_15", fixed(self.load_15))
    }
}

fn percent(part: f64, total: f64) -> f64 {
    if total <= 0.0 { 0.0 } else { part / total * 100.0 }
}

/// 保留 `System` 实例，使相邻两次采样之间的 CPU 使用率有意义。
pub struct SystemStatsSampler {
    system: Mutex<System>,
}

impl Default for SystemStatsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemStatsSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }

    pub fn sample(&self) -> SystemStats {
        let mut stats = SystemStats::default();
        {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            stats.cpu_usage = f64::from(system.global_cpu_usage());
            let total = system.total_memory() as f64;
            let available = system.available_memory() as f64;
            let used = (total - available).max(0.0);
            stats.mem_total = total / MB;
            stats.mem_available = available / MB;
            stats.mem_used = used / MB;
            stats.mem_usage = percent(used, total);
        }

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|disk| disk.mount_point() == Path::new("/"));
        let (total, free) = match root {
            Some(disk) => (disk.total_space() as f64, disk.available_space() as f64),
            None => disks.list().iter().fold((0.0, 0.0), |(total, free), disk| {
                (
                    total + disk.total_space() as f64,
                    free + disk.available_space() as f64,
                )
            }),
        };
        let used = (total - free).max(0.0);
        stats.disk_total = total / GB;
        stats.disk_free = free / GB;
        stats.disk_used = used / GB;
        stats.disk_usage = percent(used, total);

        stats.uptime = System::uptime();
        let load = System::load_average();
        stats.load_1 = load.one;
        stats.load_5 = load.five;
        stats.load_15 = load.fifteen;
        stats
    }
}
