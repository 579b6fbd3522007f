//! Decoder trait abstraction

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use mirror_protocol::{CodecDescriptor, MediaType};
use serde::{Deserialize, Serialize};
use stream_demux::MediaPacket;
use tokio::sync::mpsc;

use crate::{DecoderError, DecoderResult};

/// Decoder backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// Platform decoder
    Native,
    /// Encoded access units forwarded to an external player
    #[default]
    Passthrough,
    /// OpenH264 software decoding
    Software,
}

impl DecoderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Passthrough => "passthrough",
            Self::Software => "software",
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecoderKind {
    type Err = DecoderError;

    fn from_str(s: &str) -> DecoderResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "passthrough" => Ok(Self::Passthrough),
            "software" | "openh264" => Ok(Self::Software),
            other => Err(DecoderError::UnknownKind(other.to_string())),
        }
    }
}

/// Backend-specific content of a decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    /// Access unit left encoded for the renderer
    Encoded(Bytes),
    /// Planar I420 picture, tightly packed
    I420 { width: u32, height: u32, data: Bytes },
}

impl FramePayload {
    pub fn len(&self) -> usize {
        match self {
            Self::Encoded(data) | Self::I420 { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded, timestamped frame.
///
/// Owned by exactly one holder: the backend until it is emitted, then the
/// scheduler, then the renderer or back to the backend via `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    pub media_type: MediaType,
    pub presentation_time_us: u64,
    pub is_keyframe: bool,
    pub data: FramePayload,
    /// Assigned by the sink, unique per session
    pub sequence: u64,
}

impl DecodedFrame {
    pub fn new(media_type: MediaType, presentation_time_us: u64, is_keyframe: bool, data: FramePayload) -> Self {
        Self {
            media_type,
            presentation_time_us,
            // Every audio frame is independently decodable
            is_keyframe: is_keyframe || media_type == MediaType::Audio,
            data,
            sequence: 0,
        }
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }
}

/// Receiving end of a backend's frame output
pub type FrameStream = mpsc::UnboundedReceiver<DecodedFrame>;

/// Push handle a backend emits decoded frames into
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<DecodedFrame>,
    next_sequence: Arc<AtomicU64>,
}

impl FrameSink {
    /// Stamp the frame with a sequence number and hand it to the consumer
    pub fn emit(&self, mut frame: DecodedFrame) -> DecoderResult<u64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        frame.sequence = sequence;
        self.tx.send(frame).map_err(|_| DecoderError::SinkClosed)?;
        Ok(sequence)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a connected sink/stream pair
pub fn frame_channel() -> (FrameSink, FrameStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = FrameSink {
        tx,
        next_sequence: Arc::new(AtomicU64::new(0)),
    };
    (sink, rx)
}

/// Decoder capability interface
///
/// Backends receive routed packets and push decoded frames into their
/// `FrameSink`. Callers never branch on which backend is active.
pub trait DecoderAdapter: Send {
    /// Which backend this is
    fn kind(&self) -> DecoderKind;

    /// Install or replace the codec configuration for one media type
    fn configure(&mut self, descriptor: &CodecDescriptor) -> DecoderResult<()>;

    /// Decode one access unit; zero or more frames may be emitted
    fn submit(&mut self, packet: &MediaPacket) -> DecoderResult<()>;

    /// Take back ownership of a frame that will not be presented
    fn release(&mut self, frame: DecodedFrame);

    /// Drop decoder state; a new keyframe is needed afterwards
    fn reset(&mut self);

    /// Get decoder statistics
    fn stats(&self) -> DecoderStats;
}

/// Decoder statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Access units submitted
    pub packets_submitted: u64,
    /// Frames pushed to the sink
    pub frames_emitted: u64,
    /// Frames handed back via `release`
    pub frames_released: u64,
    /// Frames emitted and not yet released
    pub frames_outstanding: u64,
    /// Submissions that failed
    pub decode_errors: u64,
    /// Average decode time in microseconds
    pub avg_decode_time_us: u64,
}
