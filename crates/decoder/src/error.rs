//! Decoder error types

use mirror_protocol::{CodecId, MediaType};
use thiserror::Error;

use crate::DecoderKind;

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Decoder backend not available: {0}")]
    UnsupportedBackend(DecoderKind),

    #[error("{backend} decoder does not support codec {codec:?}")]
    UnsupportedCodec { backend: DecoderKind, codec: CodecId },

    #[error("No {0} codec descriptor delivered yet")]
    DescriptorMissing(MediaType),

    #[error("Decoder not configured for {0}")]
    NotConfigured(MediaType),

    #[error("Decoder initialization failed: {0}")]
    InitFailed(String),

    #[error("Decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Unknown decoder kind: {0}")]
    UnknownKind(String),

    #[error("Frame consumer is gone")]
    SinkClosed,
}

pub type DecoderResult<T> = Result<T, DecoderError>;
