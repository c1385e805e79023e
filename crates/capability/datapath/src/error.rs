use gw_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum DataPathError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
