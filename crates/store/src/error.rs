use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message not found: {0}")]
    MessageNotFound(i64),
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for StoreError {
    fn from(e: rusqlite_migration::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
