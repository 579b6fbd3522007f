//! Session error types

use decoder::DecoderError;
use mirror_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid playback settings: {0}")]
    Playback(#[from] ProtocolError),

    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session not active")]
    NotActive,
}

pub type SessionResult<T> = Result<T, SessionError>;
