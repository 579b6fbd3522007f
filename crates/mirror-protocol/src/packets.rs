//! Packet definitions for the multiplexed media stream

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{FIRST_MUX_TAG, LEGACY_HEADER_LEN, MUX_HEADER_LEN, ProtocolError, ProtocolResult};

/// Type of packet carried on the media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Legacy single-stream H.264 elementary stream
    LegacyVideoH264 = 0x00,
    /// Legacy single-stream AAC in ADTS framing
    LegacyAudioAacAdts = 0x01,
    /// H.264 decoder configuration (SPS/PPS)
    VideoConfigH264 = 0x10,
    /// H.264 access unit starting with an IDR slice
    VideoKeyFrameH264 = 0x11,
    /// H.264 access unit that depends on previous frames
    VideoDeltaFrameH264 = 0x12,
    /// AAC AudioSpecificConfig
    AudioConfigAac = 0x20,
    /// Raw AAC access unit
    AudioFrameAac = 0x21,
}

impl PacketType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn media_type(self) -> MediaType {
        match self {
            Self::LegacyVideoH264
            | Self::VideoConfigH264
            | Self::VideoKeyFrameH264
            | Self::VideoDeltaFrameH264 => MediaType::Video,
            Self::LegacyAudioAacAdts | Self::AudioConfigAac | Self::AudioFrameAac => {
                MediaType::Audio
            }
        }
    }

    pub fn is_legacy(self) -> bool {
        matches!(self, Self::LegacyVideoH264 | Self::LegacyAudioAacAdts)
    }

    pub fn is_config(self) -> bool {
        matches!(self, Self::VideoConfigH264 | Self::AudioConfigAac)
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> ProtocolResult<Self> {
        match tag {
            0x00 => Ok(Self::LegacyVideoH264),
            0x01 => Ok(Self::LegacyAudioAacAdts),
            0x10 => Ok(Self::VideoConfigH264),
            0x11 => Ok(Self::VideoKeyFrameH264),
            0x12 => Ok(Self::VideoDeltaFrameH264),
            0x20 => Ok(Self::AudioConfigAac),
            0x21 => Ok(Self::AudioFrameAac),
            other => Err(ProtocolError::InvalidPacketType(other)),
        }
    }
}

/// Header layout of a frame, decided by its raw tag byte.
///
/// Unknown tags still get a layout so the framer can step over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// `tag | length:u32`
    Legacy,
    /// `tag | pts_us:u64 | length:u32`
    Multiplexed,
}

impl FrameLayout {
    pub fn for_tag(tag: u8) -> Self {
        if tag < FIRST_MUX_TAG {
            Self::Legacy
        } else {
            Self::Multiplexed
        }
    }

    pub fn header_len(self) -> usize {
        match self {
            Self::Legacy => LEGACY_HEADER_LEN,
            Self::Multiplexed => MUX_HEADER_LEN,
        }
    }
}

/// Media type of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    Video,
    Audio,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Codec identifier (ASCII-derived magic number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CodecId {
    /// "h264"
    H264 = 0x6832_3634,
    /// "\0aac"
    Aac = 0x0061_6163,
}

impl CodecId {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn media_type(self) -> MediaType {
        match self {
            Self::H264 => MediaType::Video,
            Self::Aac => MediaType::Audio,
        }
    }
}

impl TryFrom<u32> for CodecId {
    type Error = ProtocolError;

    fn try_from(value: u32) -> ProtocolResult<Self> {
        match value {
            0x6832_3634 => Ok(Self::H264),
            0x0061_6163 => Ok(Self::Aac),
            other => Err(ProtocolError::UnknownCodec(other)),
        }
    }
}

/// A single framed packet. Immutable once framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw tag byte, kept as-is so unknown tags survive framing
    pub tag: u8,
    /// Presentation timestamp in microseconds (multiplexed frames only)
    pub timestamp_us: Option<u64>,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, timestamp_us: Option<u64>, payload: impl Into<Bytes>) -> Self {
        Self {
            tag: packet_type.tag(),
            timestamp_us,
            payload: payload.into(),
        }
    }

    /// Resolve the tag against the closed set of known packet types
    pub fn packet_type(&self) -> ProtocolResult<PacketType> {
        PacketType::try_from(self.tag)
    }

    pub fn layout(&self) -> FrameLayout {
        FrameLayout::for_tag(self.tag)
    }

    /// Size of this packet on the wire
    pub fn encoded_len(&self) -> usize {
        self.layout().header_len() + self.payload.len()
    }

    /// Serialize into `dst` using the header layout implied by the tag.
    ///
    /// Legacy frames carry no timestamp; a multiplexed frame without one is
    /// written with a zero pts.
    pub fn encode(&self, dst: &mut BytesMut) -> ProtocolResult<()> {
        let len = u32::try_from(self.payload.len()).map_err(|_| ProtocolError::PacketTooLarge {
            size: self.payload.len(),
            max: u32::MAX as usize,
        })?;

        dst.reserve(self.encoded_len());
        dst.put_u8(self.tag);
        if self.layout() == FrameLayout::Multiplexed {
            dst.put_u64(self.timestamp_us.unwrap_or(0));
        }
        dst.put_u32(len);
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Serialize to bytes for transmission
    pub fn to_bytes(&self) -> ProtocolResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Codec configuration delivered by a config packet.
///
/// Replaced wholesale by any later config packet of the same media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub codec: CodecId,
    pub config: Bytes,
}

impl CodecDescriptor {
    pub fn new(codec: CodecId, config: impl Into<Bytes>) -> Self {
        Self {
            codec,
            config: config.into(),
        }
    }

    pub fn media_type(&self) -> MediaType {
        self.codec.media_type()
    }

    /// Parse a multiplexed config payload: `codec_id:u32 | config bytes`
    pub fn from_config_payload(payload: &Bytes) -> ProtocolResult<Self> {
        if payload.len() < 4 {
            return Err(ProtocolError::MissingField("codec_id"));
        }
        let mut header = &payload[..4];
        let codec = CodecId::try_from(header.get_u32())?;
        Ok(Self {
            codec,
            config: payload.slice(4..),
        })
    }

    /// Build the multiplexed config payload for this descriptor
    pub fn to_config_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.config.len());
        buf.put_u32(self.codec.as_u32());
        buf.extend_from_slice(&self.config);
        buf.freeze()
    }
}
