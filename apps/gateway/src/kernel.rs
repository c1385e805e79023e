//! 内核：持有全部存储与运行组件，负责装配、启动与有序停机。

use gw_collector::{Collector, CollectorDeps, CollectorError, CollectorSettings, RuntimeIntervals};
use gw_config::AppConfig;
use gw_datapath::{DataPath, DataPathSettings, DataPathStores, ThresholdCache};
use gw_driver::{DriverError, DriverExecutor, DriverManager};
use gw_northbound::Dispatcher;
use gw_storage::{
    AlarmLogStore, DATA_MIGRATIONS, DeviceStore, DriverStore, GatewayConfigStore, HistoryStore,
    NorthboundConfigStore, PARAM_MIGRATIONS, PoolSettings, ResourceStore, RuntimeAuditStore,
    SqliteAlarmLogStore, SqliteDeviceStore, SqliteDriverStore, SqliteGatewayConfigStore,
    SqliteHistoryStore, SqliteNorthboundConfigStore, SqliteResourceStore,
    SqliteRuntimeAuditStore, SqliteThresholdStore, StorageError, ThresholdStore, connect_sqlite,
    run_migrations,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// 停机总时限
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("collector error: {0}")]
    Collector(#[from] CollectorError),
}

/// 参数库与历史库上的全部存储。
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub drivers: Arc<dyn DriverStore>,
    pub thresholds: Arc<dyn ThresholdStore>,
    pub alarm_logs: Arc<dyn AlarmLogStore>,
    pub northbound: Arc<dyn NorthboundConfigStore>,
    pub gateway: Arc<dyn GatewayConfigStore>,
    pub audits: Arc<dyn RuntimeAuditStore>,
    pub history: Arc<dyn HistoryStore>,
}

impl Stores {
    /// 打开两个 SQLite 文件并执行迁移；迁移失败视为致命错误。
    pub async fn open_sqlite(config: &AppConfig) -> Result<Self, KernelError> {
        let pool = PoolSettings {
            max_open: config.db_max_open_conns,
            max_idle: config.db_max_idle_conns,
        };
        let param = connect_sqlite(&config.param_db_path, pool).await?;
        let applied = run_migrations(&param, PARAM_MIGRATIONS).await?;
        info!(target: "gw.kernel", path = %config.param_db_path, applied, "param_db_ready");
        let data = connect_sqlite(&config.data_db_path, pool).await?;
        let applied = run_migrations(&data, DATA_MIGRATIONS).await?;
        info!(target: "gw.kernel", path = %config.data_db_path, applied, "data_db_ready");

        Ok(Self {
            devices: Arc::new(SqliteDeviceStore::new(param.clone())),
            resources: Arc::new(SqliteResourceStore::new(param.clone())),
            drivers: Arc::new(SqliteDriverStore::new(param.clone())),
            thresholds: Arc::new(SqliteThresholdStore::new(param.clone())),
            alarm_logs: Arc::new(SqliteAlarmLogStore::new(param.clone())),
            northbound: Arc::new(SqliteNorthboundConfigStore::new(param.clone())),
            gateway: Arc::new(SqliteGatewayConfigStore::new(param.clone())),
            audits: Arc::new(SqliteRuntimeAuditStore::new(param)),
            history: Arc::new(SqliteHistoryStore::new(data)),
        })
    }
}

pub struct Kernel {
    pub stores: Stores,
    pub executor: Arc<DriverExecutor>,
    pub thresholds: ThresholdCache,
    pub datapath: DataPath,
    pub dispatcher: Dispatcher,
    pub collector: Collector,
}

impl Kernel {
    pub fn new(config: &AppConfig, stores: Stores) -> Result<Self, KernelError> {
        let manager = Arc::new(DriverManager::new(config.drivers_dir.clone())?);
        let executor = Arc::new(DriverExecutor::new(
            manager,
            stores.drivers.clone(),
            stores.resources.clone(),
        ));
        executor.set_call_timeout(config.driver_call_timeout);
        executor.set_timeouts(
            config.driver_serial_read_timeout,
            config.driver_tcp_dial_timeout,
            config.driver_tcp_read_timeout,
        );
        executor.set_retries(
            config.driver_serial_open_retries,
            config.driver_tcp_dial_retries,
            config.driver_serial_open_backoff,
            config.driver_tcp_dial_backoff,
        );

        let thresholds = ThresholdCache::new(
            stores.thresholds.clone(),
            stores.devices.clone(),
            config.threshold_cache_enabled,
            config.threshold_cache_ttl,
        );
        let datapath = DataPath::new(
            DataPathStores {
                history: stores.history.clone(),
                alarm_logs: stores.alarm_logs.clone(),
                gateway: stores.gateway.clone(),
            },
            thresholds.clone(),
            DataPathSettings {
                max_data_cache: config.max_data_cache.unwrap_or(0),
                max_data_points: config.max_data_points.unwrap_or(0),
                sync_interval: config.sync_interval,
                sync_batch_trigger: config.sync_batch_trigger,
                ..DataPathSettings::default()
            },
        );
        let dispatcher = Dispatcher::new();
        datapath.set_alarm_sink(Arc::new(dispatcher.clone()));

        let collector = Collector::new(
            CollectorDeps {
                executor: executor.clone(),
                devices: stores.devices.clone(),
                gateway: stores.gateway.clone(),
                datapath: datapath.clone(),
                dispatcher: dispatcher.clone(),
            },
            CollectorSettings {
                intervals: RuntimeIntervals {
                    device_sync: config.collector_device_sync_interval,
                    command_poll: config.collector_command_poll_interval,
                },
                workers: config.collector_workers,
                system_stats_enabled: config.system_stats_enabled,
                ..CollectorSettings::default()
            },
        );

        Ok(Self {
            stores,
            executor,
            thresholds,
            datapath,
            dispatcher,
            collector,
        })
    }

    /// 北向 → 阈值缓存 → 数据通路 → 采集器。
    pub async fn start(&self) -> Result<(), KernelError> {
        match self
            .dispatcher
            .reload_from_configs(self.stores.northbound.as_ref())
            .await
        {
            Ok(active) => info!(target: "gw.kernel", active, "northbound_loaded"),
            Err(err) => warn!(target: "gw.kernel", error = %err, "northbound_load_failed"),
        }
        self.dispatcher.start().await;
        self.thresholds.start().await;
        self.datapath.start().await;
        self.collector.start().await?;
        info!(target: "gw.kernel", "kernel_started");
        Ok(())
    }

    /// 按固定顺序停机，每一步受总时限约束，超时记录后继续下一步。
    pub async fn shutdown(&self) {
        let deadline = Instant::now() + SHUTDOWN_DEADLINE;
        bounded(deadline, "collector", async {
            if let Err(err) = self.collector.stop().await {
                info!(target: "gw.kernel", error = %err, "collector_not_running");
            }
        })
        .await;
        bounded(deadline, "data_sync", self.datapath.stop_sync()).await;
        bounded(deadline, "retention", self.datapath.stop_retention()).await;
        bounded(deadline, "final_flush", async {
            if let Err(err) = self.datapath.flush().await {
                warn!(target: "gw.kernel", error = %err, "final_flush_failed");
            }
        })
        .await;
        bounded(deadline, "dispatcher", self.dispatcher.stop()).await;
        bounded(deadline, "threshold_cache", self.thresholds.stop()).await;
        info!(target: "gw.kernel", "kernel_stopped");
    }
}

async fn bounded<F>(deadline: Instant, step: &'static str, step_future: F)
where
    F: Future<Output = ()>,
{
    let remaining = deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout(remaining, step_future).await {
        Ok(()) => info!(target: "gw.kernel", step, "shutdown_step_done"),
        Err(_) => warn!(target: "gw.kernel", step, "shutdown_step_timeout"),
    }
}

/// Ctrl-C 或 SIGTERM。
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "gw.kernel", error = %err, "ctrl_c_unavailable");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "gw.kernel", error = %err, "sigterm_unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!(target: "gw.kernel", "shutdown_signal_received");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use domain::GatewayConfig;
    use gw_storage::{
        InMemoryAlarmLogStore, InMemoryDeviceStore, InMemoryDriverStore,
        InMemoryGatewayConfigStore, InMemoryHistoryStore, InMemoryNorthboundConfigStore,
        InMemoryResourceStore, InMemoryRuntimeAuditStore, InMemoryThresholdStore,
    };

    pub(crate) fn test_config() -> AppConfig {
        AppConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            session_secret: None,
            http_read_timeout: Duration::from_secs(30),
            http_write_timeout: Duration::from_secs(30),
            http_idle_timeout: Duration::from_secs(60),
            param_db_path: "param.db".to_string(),
            data_db_path: "data.db".to_string(),
            db_max_open_conns: 5,
            db_max_idle_conns: 1,
            drivers_dir: "drivers".to_string(),
            collector_workers: 4,
            collector_device_sync_interval: Duration::from_millis(100),
            collector_command_poll_interval: Duration::from_millis(100),
            system_stats_enabled: false,
            sync_interval: Duration::from_secs(300),
            sync_batch_trigger: 1000,
            max_data_points: Some(1000),
            max_data_cache: Some(1000),
            threshold_cache_enabled: true,
            threshold_cache_ttl: Duration::from_secs(60),
            driver_call_timeout: Duration::ZERO,
            driver_serial_read_timeout: Duration::ZERO,
            driver_tcp_dial_timeout: Duration::ZERO,
            driver_tcp_read_timeout: Duration::ZERO,
            driver_serial_open_retries: 1,
            driver_tcp_dial_retries: 1,
            driver_serial_open_backoff: Duration::from_millis(200),
            driver_tcp_dial_backoff: Duration::from_millis(200),
        }
    }

    pub(crate) fn memory_stores() -> Stores {
        Stores {
            devices: Arc::new(InMemoryDeviceStore::new()),
            resources: Arc::new(InMemoryResourceStore::new()),
            drivers: Arc::new(InMemoryDriverStore::new()),
            thresholds: Arc::new(InMemoryThresholdStore::new()),
            alarm_logs: Arc::new(InMemoryAlarmLogStore::new()),
            northbound: Arc::new(InMemoryNorthboundConfigStore::new()),
            gateway: Arc::new(InMemoryGatewayConfigStore::new(GatewayConfig::default())),
            audits: Arc::new(InMemoryRuntimeAuditStore::new()),
            history: Arc::new(InMemoryHistoryStore::new()),
        }
    }

    #[tokio::test]
    async fn start_then_shutdown_in_order() {
        let kernel = Kernel::new(&test_config(), memory_stores()).expect("kernel");
        kernel.start().await.expect("start");
        assert!(kernel.collector.is_running().await);
        assert!(kernel.datapath.is_syncing().await);
        assert!(kernel.dispatcher.is_running().await);
        assert!(kernel.thresholds.is_running().await);

        kernel.shutdown().await;
        assert!(!kernel.collector.is_running().await);
        assert!(!kernel.datapath.is_syncing().await);
        assert!(!kernel.dispatcher.is_running().await);
        assert!(!kernel.thresholds.is_running().await);
    }

    #[tokio::test]
    async fn sqlite_stores_migrate_on_open() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config();
        config.param_db_path = dir.path().join("param.db").to_string_lossy().to_string();
        config.data_db_path = dir.path().join("data.db").to_string_lossy().to_string();

        let stores = Stores::open_sqlite(&config).await.expect("open");
        let gateway = stores.gateway.get_gateway_config().await.expect("gateway");
        assert_eq!(gateway.alarm_repeat_interval_seconds, 60);
        assert_eq!(stores.history.count_points().await.expect("count"), 0);

        let reopened = Stores::open_sqlite(&config).await.expect("reopen");
        assert!(reopened.devices.list_devices().await.expect("devices").is_empty());
    }
}
