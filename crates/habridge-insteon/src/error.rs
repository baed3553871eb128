//! Error types for Insteon decoding and dispatch

use thiserror::Error;

/// Result type alias for Insteon operations
pub type Result<T> = std::result::Result<T, InsteonError>;

/// Field lookup failures on a decoded message
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The message definition has no field with this name
    #[error("field not found: {0}")]
    NotFound(String),

    /// The field is defined but the buffer is too short to hold it
    #[error("field {name} at offset {offset} out of range (len {len})")]
    OutOfRange {
        name: String,
        offset: usize,
        len: usize,
    },

    /// The field exists but has a different type than requested
    #[error("field {0} has wrong type")]
    WrongType(String),
}

/// Insteon error types
#[derive(Error, Debug)]
pub enum InsteonError {
    /// Field access failed
    #[error(transparent)]
    Field(#[from] FieldError),

    /// No message definition for this command byte
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// Frame does not start with 0x02
    #[error("invalid start byte: expected 0x02, got 0x{0:02x}")]
    InvalidStart(u8),

    /// Frame length does not match the definition
    #[error("invalid length for {name}: expected {expected}, got {actual}")]
    InvalidLength {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Address string could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A feature table references a handler that does not exist
    #[error("unknown handler: {0}")]
    UnknownHandler(String),

    /// A device type references a feature that does not exist
    #[error("unknown feature type: {0}")]
    UnknownFeature(String),

    /// No device type registered for this product key
    #[error("unknown product key: {0}")]
    UnknownProductKey(String),

    /// Feature or device table failed to parse
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Device already registered on the network
    #[error("duplicate device: {0}")]
    DuplicateDevice(String),
}

impl From<toml::de::Error> for InsteonError {
    fn from(e: toml::de::Error) -> Self {
        InsteonError::Catalog(e.to_string())
    }
}
