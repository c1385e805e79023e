//! 网关运行配置加载。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub log_level: String,
    pub log_json: bool,
    pub session_secret: Option<String>,
    pub http_read_timeout: Duration,
    pub http_write_timeout: Duration,
    pub http_idle_timeout: Duration,
    pub param_db_path: String,
    pub data_db_path: String,
    pub db_max_open_conns: u32,
    pub db_max_idle_conns: u32,
    pub drivers_dir: String,
    pub collector_workers: usize,
    pub collector_device_sync_interval: Duration,
    pub collector_command_poll_interval: Duration,
    pub system_stats_enabled: bool,
    pub sync_interval: Duration,
    pub sync_batch_trigger: usize,
    /// None 表示不限制（0），负数回落默认值
    pub max_data_points: Option<usize>,
    pub max_data_cache: Option<usize>,
    pub threshold_cache_enabled: bool,
    pub threshold_cache_ttl: Duration,
    pub driver_call_timeout: Duration,
    pub driver_serial_read_timeout: Duration,
    pub driver_tcp_dial_timeout: Duration,
    pub driver_tcp_read_timeout: Duration,
    pub driver_serial_open_retries: u32,
    pub driver_tcp_dial_retries: u32,
    pub driver_serial_open_backoff: Duration,
    pub driver_tcp_dial_backoff: Duration,
}

pub const DEFAULT_MAX_DATA_POINTS: usize = 100_000;
pub const DEFAULT_MAX_DATA_CACHE: usize = 10_000;

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr =
            normalize_listen_addr(&env::var("LISTEN_ADDR").unwrap_or_else(|_| ":8080".to_string()));
        let log_level = read_optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string());
        let log_json = read_bool_with_default("LOG_JSON", false);
        let session_secret = read_optional("SESSION_SECRET");
        let http_read_timeout =
            read_duration_with_default("HTTP_READ_TIMEOUT", Unit::Secs, Duration::from_secs(30))?;
        let http_write_timeout =
            read_duration_with_default("HTTP_WRITE_TIMEOUT", Unit::Secs, Duration::from_secs(30))?;
        let http_idle_timeout =
            read_duration_with_default("HTTP_IDLE_TIMEOUT", Unit::Secs, Duration::from_secs(60))?;
        let param_db_path = read_optional("PARAM_DB_PATH").unwrap_or_else(|| "param.db".to_string());
        let data_db_path = read_optional("DATA_DB_PATH").unwrap_or_else(|| "data.db".to_string());
        let db_max_open_conns = read_u32_with_default("DB_MAX_OPEN_CONNS", 25)?.max(1);
        let db_max_idle_conns = read_u32_with_default("DB_MAX_IDLE_CONNS", 10)?;
        let drivers_dir = read_optional("DRIVERS_DIR").unwrap_or_else(|| "drivers".to_string());
        let collector_workers = read_u64_with_default("COLLECTOR_WORKERS", 10)?.max(1) as usize;
        let collector_device_sync_interval = read_duration_with_default(
            "COLLECTOR_DEVICE_SYNC_INTERVAL",
            Unit::Millis,
            Duration::from_secs(10),
        )?;
        let collector_command_poll_interval = read_duration_with_default(
            "COLLECTOR_COMMAND_POLL_INTERVAL",
            Unit::Millis,
            Duration::from_millis(500),
        )?;
        let system_stats_enabled = read_bool_with_default("SYSTEM_STATS_ENABLED", true);
        let sync_interval =
            read_duration_with_default("SYNC_INTERVAL", Unit::Secs, Duration::from_secs(300))?;
        let sync_batch_trigger = read_u64_with_default("SYNC_BATCH_TRIGGER", 1000)? as usize;
        let max_data_points = read_capacity("MAX_DATA_POINTS", DEFAULT_MAX_DATA_POINTS)?;
        let max_data_cache = read_capacity("MAX_DATA_CACHE", DEFAULT_MAX_DATA_CACHE)?;
        let threshold_cache_enabled = read_bool_with_default("THRESHOLD_CACHE_ENABLED", true);
        let threshold_cache_ttl =
            read_duration_with_default("THRESHOLD_CACHE_TTL", Unit::Secs, Duration::from_secs(60))?;
        let driver_call_timeout =
            read_duration_with_default("DRIVER_CALL_TIMEOUT", Unit::Millis, Duration::ZERO)?;
        let driver_serial_read_timeout =
            read_duration_with_default("DRIVER_SERIAL_READ_TIMEOUT", Unit::Millis, Duration::ZERO)?;
        let driver_tcp_dial_timeout =
            read_duration_with_default("DRIVER_TCP_DIAL_TIMEOUT", Unit::Millis, Duration::ZERO)?;
        let driver_tcp_read_timeout =
            read_duration_with_default("DRIVER_TCP_READ_TIMEOUT", Unit::Millis, Duration::ZERO)?;
        let driver_serial_open_retries = read_u32_with_default("DRIVER_SERIAL_OPEN_RETRIES", 1)?;
        let driver_tcp_dial_retries = read_u32_with_default("DRIVER_TCP_DIAL_RETRIES", 1)?;
        let driver_serial_open_backoff = read_duration_with_default(
            "DRIVER_SERIAL_OPEN_BACKOFF",
            Unit::Millis,
            Duration::from_millis(200),
        )?;
        let driver_tcp_dial_backoff = read_duration_with_default(
            "DRIVER_TCP_DIAL_BACKOFF",
            Unit::Millis,
            Duration::from_millis(200),
        )?;

        Ok(Self {
            listen_addr,
            log_level,
            log_json,
            session_secret,
            http_read_timeout,
            http_write_timeout,
            http_idle_timeout,
            param_db_path,
            data_db_path,
            db_max_open_conns,
            db_max_idle_conns,
            drivers_dir,
            collector_workers,
            collector_device_sync_interval,
            collector_command_poll_interval,
            system_stats_enabled,
            sync_interval,
            sync_batch_trigger,
            max_data_points,
            max_data_cache,
            threshold_cache_enabled,
            threshold_cache_ttl,
            driver_call_timeout,
            driver_serial_read_timeout,
            driver_tcp_dial_timeout,
            driver_tcp_read_timeout,
            driver_serial_open_retries,
            driver_tcp_dial_retries,
            driver_serial_open_backoff,
            driver_tcp_dial_backoff,
        })
    }
}

/// `:8080` 形式补全为 `0.0.0.0:8080`。
fn normalize_listen_addr(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.starts_with(':') {
        format!("0.0.0.0{}", trimmed)
    } else if trimmed.is_empty() {
        "0.0.0.0:8080".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Millis,
    Secs,
}

/// 解析时长：纯数字按默认单位，支持 ms/s/m/h 后缀。
fn parse_duration(value: &str, unit: Unit) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    let number = number.parse::<u64>().ok()?;
    let duration = match suffix.trim() {
        "" => match unit {
            Unit::Millis => Duration::from_millis(number),
            Unit::Secs => Duration::from_secs(number),
        },
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => Duration::from_secs(number.saturating_mul(60)),
        "h" => Duration::from_secs(number.saturating_mul(3600)),
        _ => return None,
    };
    Some(duration)
}

fn read_duration_with_default(
    key: &str,
    unit: Unit,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let value = match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(default),
    };
    parse_duration(&value, unit).ok_or_else(|| ConfigError::Invalid(key.to_string(), value))
}

/// 容量：0 不限制，负数回落默认值。
fn read_capacity(key: &str, default: usize) -> Result<Option<usize>, ConfigError> {
    let value = match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => return Ok(Some(default)),
    };
    let parsed = value
        .trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value.clone()))?;
    Ok(match parsed {
        0 => None,
        n if n < 0 => Some(default),
        n => Some(n as usize),
    })
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500", Unit::Millis), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30", Unit::Secs), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m", Unit::Secs), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("6h", Unit::Millis), Some(Duration::from_secs(21_600)));
        assert_eq!(parse_duration("250ms", Unit::Secs), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("abc", Unit::Secs), None);
        assert_eq!(parse_duration("5x", Unit::Secs), None);
    }

    #[test]
    fn listen_addr_normalization() {
        assert_eq!(normalize_listen_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_listen_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
