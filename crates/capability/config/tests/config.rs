use gw_config::AppConfig;
use std::time::Duration;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("LISTEN_ADDR", ":8081");
        std::env::set_var("SYNC_INTERVAL", "2m");
        std::env::set_var("MAX_DATA_POINTS", "0");
        std::env::set_var("MAX_DATA_CACHE", "-3");
        std::env::set_var("THRESHOLD_CACHE_TTL", "90");
        std::env::set_var("LOG_JSON", "true");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.listen_addr, "0.0.0.0:8081");
    assert_eq!(config.sync_interval, Duration::from_secs(120));
    assert_eq!(config.max_data_points, None);
    assert_eq!(config.max_data_cache, Some(10_000));
    assert_eq!(config.threshold_cache_ttl, Duration::from_secs(90));
    assert!(config.log_json);
    assert_eq!(config.db_max_open_conns, 25);
    assert_eq!(config.collector_command_poll_interval, Duration::from_millis(500));
}
