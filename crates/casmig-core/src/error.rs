use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("size mismatch for {path}: source={source_size:?}, target={target_size:?}")]
    SizeMismatch {
        path: String,
        source_size: Option<u64>,
        target_size: Option<u64>,
    },

    #[error("transfer of {path} timed out after {after_ms}ms")]
    Timeout { path: String, after_ms: u64 },

    #[error("migration not found: {id}")]
    RunNotFound { id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("derivation error: {0}")]
    Derivation(String),

    #[error("invalid storage descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

impl From<serde_json::Error> for MigrationError {
    fn from(e: serde_json::Error) -> Self {
        MigrationError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        MigrationError::Storage(e.to_string())
    }
}
