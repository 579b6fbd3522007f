//! Packet classification and routing
//!
//! Normalizes the legacy single-stream tags and the multiplexed tags into
//! one `RoutedEvent` shape. The router is the only writer of the session's
//! codec descriptors.

use std::sync::Arc;

use bytes::Bytes;
use mirror_protocol::{CodecDescriptor, CodecId, MediaType, Packet, PacketType};
use tracing::{debug, info};

use crate::adts::AdtsHeader;
use crate::keyframe;
use crate::{DemuxCounters, RouteError, RouteResult};

/// Which tag scheme a packet arrived under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamScheme {
    Legacy,
    Multiplexed,
}

/// Decode dependency of a media packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Decodable on its own (IDR video, any audio frame)
    Key,
    /// Depends on earlier frames
    Delta,
}

/// Encoded media ready for a decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub media_type: MediaType,
    pub kind: FrameKind,
    pub scheme: StreamScheme,
    pub timestamp_us: Option<u64>,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn is_keyframe(&self) -> bool {
        self.kind == FrameKind::Key
    }
}

/// Normalized routing result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedEvent {
    VideoConfig(CodecDescriptor),
    VideoKeyframe(MediaPacket),
    VideoDelta(MediaPacket),
    AudioConfig(CodecDescriptor),
    AudioFrame(MediaPacket),
}

impl RoutedEvent {
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::VideoConfig(_) | Self::VideoKeyframe(_) | Self::VideoDelta(_) => {
                MediaType::Video
            }
            Self::AudioConfig(_) | Self::AudioFrame(_) => MediaType::Audio,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::VideoConfig(_) | Self::AudioConfig(_))
    }
}

/// Routes framed packets to the video and audio pipelines
pub struct StreamRouter {
    video: Option<CodecDescriptor>,
    audio: Option<CodecDescriptor>,
    counters: Arc<DemuxCounters>,
}

impl StreamRouter {
    pub fn new(counters: Arc<DemuxCounters>) -> Self {
        Self {
            video: None,
            audio: None,
            counters,
        }
    }

    /// Active descriptor for a media type
    pub fn descriptor(&self, media: MediaType) -> Option<&CodecDescriptor> {
        match media {
            MediaType::Video => self.video.as_ref(),
            MediaType::Audio => self.audio.as_ref(),
        }
    }

    /// Forget both descriptors (stream restart)
    pub fn reset(&mut self) {
        self.video = None;
        self.audio = None;
    }

    /// Classify a packet.
    ///
    /// Produces the packet's event, preceded by a config event when the
    /// packet (re)configured its stream. Legacy and multiplexed packets may
    /// be interleaved freely.
    pub fn route(&mut self, packet: Packet) -> RouteResult<Vec<RoutedEvent>> {
        let packet_type = match packet.packet_type() {
            Ok(packet_type) => packet_type,
            Err(_) => {
                self.counters.unknown_packet_type();
                debug!(tag = packet.tag, "Dropping packet with unknown type");
                return Err(RouteError::UnknownPacketType(packet.tag));
            }
        };

        let result = match packet_type {
            PacketType::LegacyVideoH264 => Ok(self.route_legacy_video(packet)),
            PacketType::LegacyAudioAacAdts => self.route_legacy_audio(packet),
            PacketType::VideoConfigH264 | PacketType::AudioConfigAac => {
                self.route_config(packet_type.media_type(), &packet.payload)
            }
            PacketType::VideoKeyFrameH264 => Ok(vec![RoutedEvent::VideoKeyframe(
                media_packet(MediaType::Video, FrameKind::Key, StreamScheme::Multiplexed, packet),
            )]),
            PacketType::VideoDeltaFrameH264 => Ok(vec![RoutedEvent::VideoDelta(media_packet(
                MediaType::Video,
                FrameKind::Delta,
                StreamScheme::Multiplexed,
                packet,
            ))]),
            PacketType::AudioFrameAac => Ok(vec![RoutedEvent::AudioFrame(media_packet(
                MediaType::Audio,
                FrameKind::Key,
                StreamScheme::Multiplexed,
                packet,
            ))]),
        };

        if let Err(e) = &result {
            match e {
                RouteError::CodecMismatch { .. } => self.counters.codec_mismatch(),
                _ => self.counters.malformed_payload(),
            }
            debug!("Dropping packet: {}", e);
        }
        result
    }

    fn route_config(&mut self, media: MediaType, payload: &Bytes) -> RouteResult<Vec<RoutedEvent>> {
        let descriptor =
            CodecDescriptor::from_config_payload(payload).map_err(RouteError::MalformedConfig)?;
        if descriptor.media_type() != media {
            return Err(RouteError::CodecMismatch {
                media,
                actual: descriptor.codec,
            });
        }

        self.install(descriptor.clone());
        Ok(vec![config_event(descriptor)])
    }

    fn route_legacy_video(&mut self, packet: Packet) -> Vec<RoutedEvent> {
        let mut events = Vec::with_capacity(2);

        if let Some(config) = keyframe::parameter_sets(&packet.payload) {
            let descriptor = CodecDescriptor::new(CodecId::H264, config);
            if self.video.as_ref() != Some(&descriptor) {
                self.install(descriptor.clone());
                events.push(RoutedEvent::VideoConfig(descriptor));
            }
        }

        if keyframe::has_picture_data(&packet.payload) {
            if keyframe::is_keyframe(&packet.payload) {
                events.push(RoutedEvent::VideoKeyframe(media_packet(
                    MediaType::Video,
                    FrameKind::Key,
                    StreamScheme::Legacy,
                    packet,
                )));
            } else {
                events.push(RoutedEvent::VideoDelta(media_packet(
                    MediaType::Video,
                    FrameKind::Delta,
                    StreamScheme::Legacy,
                    packet,
                )));
            }
        }

        events
    }

    fn route_legacy_audio(&mut self, packet: Packet) -> RouteResult<Vec<RoutedEvent>> {
        let header = AdtsHeader::parse(&packet.payload).ok_or(RouteError::MalformedPayload {
            media: MediaType::Audio,
            reason: "missing ADTS header",
        })?;

        let mut events = Vec::with_capacity(2);
        let descriptor = CodecDescriptor::new(
            CodecId::Aac,
            Bytes::copy_from_slice(&header.audio_specific_config()),
        );
        if self.audio.as_ref() != Some(&descriptor) {
            self.install(descriptor.clone());
            events.push(RoutedEvent::AudioConfig(descriptor));
        }

        events.push(RoutedEvent::AudioFrame(media_packet(
            MediaType::Audio,
            FrameKind::Key,
            StreamScheme::Legacy,
            packet,
        )));
        Ok(events)
    }

    /// Replace (never merge) the descriptor of the descriptor's media type
    fn install(&mut self, descriptor: CodecDescriptor) {
        let media = descriptor.media_type();
        info!(
            %media,
            codec = ?descriptor.codec,
            config_len = descriptor.config.len(),
            "Codec descriptor updated"
        );
        match media {
            MediaType::Video => self.video = Some(descriptor),
            MediaType::Audio => self.audio = Some(descriptor),
        }
        self.counters.descriptor_updated();
    }
}

impl Default for StreamRouter {
    fn default() -> Self {
        Self::new(Arc::new(DemuxCounters::new()))
    }
}

fn config_event(descriptor: CodecDescriptor) -> RoutedEvent {
    match descriptor.media_type() {
        MediaType::Video => RoutedEvent::VideoConfig(descriptor),
        MediaType::Audio => RoutedEvent::AudioConfig(descriptor),
    }
}

fn media_packet(media_type: MediaType, kind: FrameKind, scheme: StreamScheme, packet: Packet) -> MediaPacket {
    MediaPacket {
        media_type,
        kind,
        scheme,
        timestamp_us: packet.timestamp_us,
        payload: packet.payload,
    }
}
