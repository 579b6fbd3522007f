//! Routed-event front end for the active decoder backend

use mirror_protocol::{CodecDescriptor, MediaType};
use serde::Serialize;
use stream_demux::{MediaPacket, RoutedEvent};
use tracing::{debug, info, warn};

use crate::{
    AAC_SAMPLES_PER_FRAME, DecodedFrame, DecoderAdapter, DecoderError, DecoderKind,
    DecoderResult, DecoderStats,
};

/// AAC sampling frequencies by index
const SAMPLING_FREQUENCIES: [u64; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

const DEFAULT_SAMPLE_RATE: u64 = 48000;

/// Pipeline statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames rejected because their media type had no descriptor yet
    pub descriptor_missing: u64,
    /// Video frames skipped while waiting for a keyframe
    pub frames_skipped: u64,
    /// Backend submissions that failed
    pub decode_errors: u64,
    /// Descriptor installs forwarded to the backend
    pub reconfigurations: u64,
    /// Backend restarts after an error or a hard re-sync
    pub flushes: u64,
}

/// Feeds routed events into a decoder backend.
///
/// Frames are only submitted once a descriptor for their media type has
/// been delivered, and video resumes only at a keyframe after a flush.
/// Legacy packets carry no timestamp; they are stamped from the frame rate
/// (video) or the AAC frame duration (audio).
pub struct MediaPipeline {
    decoder: Box<dyn DecoderAdapter>,
    video: Option<CodecDescriptor>,
    audio: Option<CodecDescriptor>,
    awaiting_keyframe: bool,
    video_frame_us: u64,
    audio_frame_us: u64,
    next_video_pts: u64,
    next_audio_pts: u64,
    stats: PipelineStats,
}

impl MediaPipeline {
    pub fn new(decoder: Box<dyn DecoderAdapter>, frames_per_second: u32) -> Self {
        Self {
            decoder,
            video: None,
            audio: None,
            awaiting_keyframe: true,
            video_frame_us: 1_000_000 / u64::from(frames_per_second.max(1)),
            audio_frame_us: aac_frame_duration_us(DEFAULT_SAMPLE_RATE),
            next_video_pts: 0,
            next_audio_pts: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn kind(&self) -> DecoderKind {
        self.decoder.kind()
    }

    /// Apply one routed event
    pub fn handle(&mut self, event: RoutedEvent) -> DecoderResult<()> {
        match event {
            RoutedEvent::VideoConfig(descriptor) | RoutedEvent::AudioConfig(descriptor) => {
                self.configure(descriptor)
            }
            RoutedEvent::VideoKeyframe(packet)
            | RoutedEvent::VideoDelta(packet)
            | RoutedEvent::AudioFrame(packet) => self.submit(packet),
        }
    }

    fn configure(&mut self, descriptor: CodecDescriptor) -> DecoderResult<()> {
        let media = descriptor.media_type();
        if self.descriptor(media) == Some(&descriptor) {
            return Ok(());
        }

        self.decoder.configure(&descriptor)?;
        self.stats.reconfigurations += 1;
        match media {
            MediaType::Video => {
                // Frames coded against the old parameter sets are useless now
                self.awaiting_keyframe = true;
                self.video = Some(descriptor);
            }
            MediaType::Audio => {
                if let Some(rate) = sample_rate(&descriptor.config) {
                    self.audio_frame_us = aac_frame_duration_us(rate);
                }
                self.audio = Some(descriptor);
            }
        }
        Ok(())
    }

    fn submit(&mut self, mut packet: MediaPacket) -> DecoderResult<()> {
        let media = packet.media_type;
        if self.descriptor(media).is_none() {
            self.stats.descriptor_missing += 1;
            debug!(%media, "Frame arrived before its codec descriptor");
            return Err(DecoderError::DescriptorMissing(media));
        }

        if media == MediaType::Video {
            if self.awaiting_keyframe && !packet.is_keyframe() {
                self.stats.frames_skipped += 1;
                return Ok(());
            }
            self.awaiting_keyframe = false;
        }

        packet.timestamp_us = Some(self.stamp(media, packet.timestamp_us));

        if let Err(e) = self.decoder.submit(&packet) {
            self.stats.decode_errors += 1;
            warn!(%media, "Decoder rejected frame: {}", e);
            if media == MediaType::Video && !matches!(e, DecoderError::SinkClosed) {
                self.flush_to_keyframe();
            }
            return Err(e);
        }
        Ok(())
    }

    fn stamp(&mut self, media: MediaType, timestamp_us: Option<u64>) -> u64 {
        let (next, step) = match media {
            MediaType::Video => (&mut self.next_video_pts, self.video_frame_us),
            MediaType::Audio => (&mut self.next_audio_pts, self.audio_frame_us),
        };
        let pts = timestamp_us.unwrap_or(*next);
        *next = pts.saturating_add(step);
        pts
    }

    /// Skip video until the next keyframe and restart the backend.
    ///
    /// No-op while already waiting for a keyframe: nothing was decoded
    /// since the last restart.
    pub fn flush_to_keyframe(&mut self) {
        if self.awaiting_keyframe {
            debug!("Decoder already waiting for a keyframe, flush skipped");
            return;
        }
        info!("Flushing video decoder to next keyframe");
        self.awaiting_keyframe = true;
        self.stats.flushes += 1;
        self.decoder.reset();
        if let Some(descriptor) = &self.video {
            if let Err(e) = self.decoder.configure(descriptor) {
                warn!("Failed to restore video configuration: {}", e);
            }
        }
    }

    pub fn is_awaiting_keyframe(&self) -> bool {
        self.awaiting_keyframe
    }

    pub fn descriptor(&self, media: MediaType) -> Option<&CodecDescriptor> {
        match media {
            MediaType::Video => self.video.as_ref(),
            MediaType::Audio => self.audio.as_ref(),
        }
    }

    /// Return a frame that will not be presented to its backend
    pub fn release(&mut self, frame: DecodedFrame) {
        self.decoder.release(frame);
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }
}

/// Sample rate encoded in an AudioSpecificConfig
fn sample_rate(config: &[u8]) -> Option<u64> {
    let &[b0, b1, ..] = config else {
        return None;
    };
    let index = ((b0 & 0x07) << 1) | (b1 >> 7);
    SAMPLING_FREQUENCIES.get(index as usize).copied()
}

fn aac_frame_duration_us(sample_rate: u64) -> u64 {
    AAC_SAMPLES_PER_FRAME * 1_000_000 / sample_rate
}
