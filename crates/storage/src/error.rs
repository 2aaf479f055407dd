use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage quota exceeded writing {key}")]
    QuotaExceeded { key: String },

    #[error("core error: {0}")]
    Core(#[from] catalog_core::CoreError),
}
