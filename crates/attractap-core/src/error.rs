use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol errors
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unknown frame kind: 0x{0:02X}")]
    UnknownFrameKind(u8),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // Validation errors
    #[error("Invalid card UID: {0}")]
    InvalidCardUid(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid key slot: {0}")]
    InvalidKeySlot(u8),

    // Collaborator errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Firmware error: {0}")]
    Firmware(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
