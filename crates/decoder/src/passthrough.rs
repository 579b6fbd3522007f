//! Passthrough backend
//!
//! Forwards encoded access units as frames for an external player. Video
//! keyframes are prefixed with the active SPS/PPS so playback can start at
//! any of them.

use std::collections::HashSet;

use bytes::{BufMut, BytesMut};
use mirror_protocol::{CodecDescriptor, CodecId, MediaType};
use stream_demux::{MediaPacket, keyframe};
use tracing::{debug, info};

use crate::{
    DecodedFrame, DecoderAdapter, DecoderError, DecoderKind, DecoderResult, DecoderStats,
    FramePayload, FrameSink,
};

pub struct PassthroughDecoder {
    sink: FrameSink,
    video: Option<CodecDescriptor>,
    audio: Option<CodecDescriptor>,
    outstanding: HashSet<u64>,
    stats: DecoderStats,
}

impl PassthroughDecoder {
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink,
            video: None,
            audio: None,
            outstanding: HashSet::new(),
            stats: DecoderStats::default(),
        }
    }

    fn descriptor(&self, media: MediaType) -> Option<&CodecDescriptor> {
        match media {
            MediaType::Video => self.video.as_ref(),
            MediaType::Audio => self.audio.as_ref(),
        }
    }
}

impl DecoderAdapter for PassthroughDecoder {
    fn kind(&self) -> DecoderKind {
        DecoderKind::Passthrough
    }

    fn configure(&mut self, descriptor: &CodecDescriptor) -> DecoderResult<()> {
        info!(
            media = %descriptor.media_type(),
            config_len = descriptor.config.len(),
            "Configuring passthrough decoder"
        );
        match descriptor.media_type() {
            MediaType::Video => self.video = Some(descriptor.clone()),
            MediaType::Audio => self.audio = Some(descriptor.clone()),
        }
        Ok(())
    }

    fn submit(&mut self, packet: &MediaPacket) -> DecoderResult<()> {
        self.stats.packets_submitted += 1;

        let Some(descriptor) = self.descriptor(packet.media_type) else {
            self.stats.decode_errors += 1;
            return Err(DecoderError::NotConfigured(packet.media_type));
        };

        let needs_parameter_sets = descriptor.codec == CodecId::H264
            && packet.is_keyframe()
            && keyframe::parameter_sets(&packet.payload).is_none();
        let data = if needs_parameter_sets {
            let mut data = BytesMut::with_capacity(descriptor.config.len() + packet.payload.len());
            data.put_slice(&descriptor.config);
            data.put_slice(&packet.payload);
            data.freeze()
        } else {
            packet.payload.clone()
        };

        let frame = DecodedFrame::new(
            packet.media_type,
            packet.timestamp_us.unwrap_or(0),
            packet.is_keyframe(),
            FramePayload::Encoded(data),
        );
        let sequence = self.sink.emit(frame)?;
        self.outstanding.insert(sequence);
        self.stats.frames_emitted += 1;
        Ok(())
    }

    fn release(&mut self, frame: DecodedFrame) {
        if self.outstanding.remove(&frame.sequence) {
            self.stats.frames_released += 1;
        } else {
            debug!(sequence = frame.sequence, "Released frame was not outstanding");
        }
    }

    fn reset(&mut self) {
        debug!("Resetting passthrough decoder");
    }

    fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_outstanding: self.outstanding.len() as u64,
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_channel;
    use bytes::Bytes;
    use stream_demux::{FrameKind, StreamScheme};

    const PARAMETER_SETS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68, 0xCE];
    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88];

    fn video_packet(kind: FrameKind, payload: &'static [u8]) -> MediaPacket {
        MediaPacket {
            media_type: MediaType::Video,
            kind,
            scheme: StreamScheme::Multiplexed,
            timestamp_us: Some(16_666),
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn test_submit_before_configure_is_rejected() {
        let (sink, mut frames) = frame_channel();
        let mut decoder = PassthroughDecoder::new(sink);
        assert!(matches!(
            decoder.submit(&video_packet(FrameKind::Key, IDR)),
            Err(DecoderError::NotConfigured(MediaType::Video))
        ));
        assert!(frames.try_recv().is_err());
        assert_eq!(decoder.stats().decode_errors, 1);
    }

    #[test]
    fn test_keyframe_carries_parameter_sets() {
        let (sink, mut frames) = frame_channel();
        let mut decoder = PassthroughDecoder::new(sink);
        decoder
            .configure(&CodecDescriptor::new(CodecId::H264, PARAMETER_SETS))
            .unwrap();
        decoder.submit(&video_packet(FrameKind::Key, IDR)).unwrap();
        decoder.submit(&video_packet(FrameKind::Delta, &[0, 0, 1, 0x41])).unwrap();

        let key = frames.try_recv().unwrap();
        assert_eq!(key.presentation_time_us, 16_666);
        assert!(key.is_keyframe);
        assert_eq!(key.data, FramePayload::Encoded([PARAMETER_SETS, IDR].concat().into()));

        let delta = frames.try_recv().unwrap();
        assert!(!delta.is_keyframe);
        assert_eq!(delta.data.len(), 4);
    }

    #[test]
    fn test_release_tracks_outstanding_frames() {
        let (sink, mut frames) = frame_channel();
        let mut decoder = PassthroughDecoder::new(sink);
        decoder
            .configure(&CodecDescriptor::new(CodecId::H264, PARAMETER_SETS))
            .unwrap();
        decoder.submit(&video_packet(FrameKind::Key, IDR)).unwrap();
        decoder.submit(&video_packet(FrameKind::Key, IDR)).unwrap();
        assert_eq!(decoder.stats().frames_outstanding, 2);

        decoder.release(frames.try_recv().unwrap());
        let stats = decoder.stats();
        assert_eq!(stats.frames_outstanding, 1);
        assert_eq!(stats.frames_released, 1);
    }
}
