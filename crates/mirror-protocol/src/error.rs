//! Error types for the protocol

use thiserror::Error;

/// Protocol error
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0:#04x}")]
    InvalidPacketType(u8),

    #[error("Unknown codec id: {0:#010x}")]
    UnknownCodec(u32),

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Value out of range for {field}: {value}")]
    ValueOutOfRange { field: &'static str, value: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
