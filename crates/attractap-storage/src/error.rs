use thiserror::Error;

/// Storage-specific error types for the Attractap gateway.
///
/// These errors represent failures in database operations, firmware asset
/// access and integrity checks of persisted records.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database connection or query execution failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration execution failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Entity not found in database
    #[error("Entity not found: {entity_type} with {field}={value}")]
    NotFound {
        entity_type: String,
        field: String,
        value: String,
    },

    /// A persisted value could not be turned back into a domain type
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Firmware index or binary problem
    #[error("Firmware error: {0}")]
    Firmware(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn not_found(entity_type: &str, field: &str, value: impl ToString) -> Self {
        StorageError::NotFound {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

impl From<StorageError> for attractap_core::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => attractap_core::Error::RecordNotFound(err.to_string()),
            StorageError::Firmware(msg) => attractap_core::Error::Firmware(msg),
            StorageError::Io(e) => attractap_core::Error::Io(e),
            other => attractap_core::Error::Storage(other.to_string()),
        }
    }
}

/// Specialized result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
