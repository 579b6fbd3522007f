//! Demuxer error types

use mirror_protocol::{CodecId, MediaType, ProtocolError};
use thiserror::Error;

/// Errors raised while cutting the byte stream into frames
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Frame with tag {tag:#04x} declares {size} bytes (max: {max})")]
    PayloadTooLarge { tag: u8, size: usize, max: usize },

    #[error("Stream ended mid-frame with {buffered} bytes pending")]
    TruncatedStream { buffered: usize },

    #[error("Failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type FramingResult<T> = Result<T, FramingError>;

/// Errors raised while routing a framed packet. None of them are fatal.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Unknown packet type: {0:#04x}")]
    UnknownPacketType(u8),

    #[error("Config packet for {media} carries codec {actual:?}")]
    CodecMismatch { media: MediaType, actual: CodecId },

    #[error("Malformed config packet: {0}")]
    MalformedConfig(#[source] ProtocolError),

    #[error("Malformed {media} payload: {reason}")]
    MalformedPayload {
        media: MediaType,
        reason: &'static str,
    },
}

pub type RouteResult<T> = Result<T, RouteError>;
