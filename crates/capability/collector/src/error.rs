use gw_driver::DriverError;
use gw_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("collector is already running")]
    AlreadyRunning,
    #[error("collector is not running")]
    NotRunning,
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}
