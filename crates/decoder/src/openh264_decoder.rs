//! OpenH264 decoder implementation

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use bytes::{BufMut, BytesMut};
use mirror_protocol::{CodecDescriptor, CodecId, MediaType};
use openh264::OpenH264API;
use openh264::decoder::{Decoder, DecoderConfig};
use openh264::formats::YUVSource;
use stream_demux::MediaPacket;
use tracing::{debug, info};

use crate::{
    DecodedFrame, DecoderAdapter, DecoderError, DecoderKind, DecoderResult, DecoderStats,
    FramePayload, FrameSink,
};

const DECODE_TIME_WINDOW: usize = 100;

/// OpenH264-based software decoder.
///
/// Decodes H.264 to I420. AAC access units are forwarded encoded.
pub struct OpenH264Decoder {
    decoder: Decoder,
    sink: FrameSink,
    video_configured: bool,
    audio_configured: bool,
    outstanding: HashSet<u64>,
    stats: DecoderStats,
    decode_times: VecDeque<u64>,
}

impl OpenH264Decoder {
    /// Create a new OpenH264 decoder
    pub fn new(sink: FrameSink) -> DecoderResult<Self> {
        Ok(Self {
            decoder: Self::create_decoder()?,
            sink,
            video_configured: false,
            audio_configured: false,
            outstanding: HashSet::new(),
            stats: DecoderStats::default(),
            decode_times: VecDeque::with_capacity(DECODE_TIME_WINDOW),
        })
    }

    fn create_decoder() -> DecoderResult<Decoder> {
        Decoder::with_api_config(OpenH264API::from_source(), DecoderConfig::new())
            .map_err(|e| DecoderError::InitFailed(e.to_string()))
    }

    fn decode_video(&mut self, packet: &MediaPacket) -> DecoderResult<()> {
        let start = Instant::now();

        let picture = {
            let decoded = self
                .decoder
                .decode(&packet.payload)
                .map_err(|e| DecoderError::DecodeFailed(e.to_string()))?;

            // Copy the planes out; the decoder reuses its buffers.
            decoded.map(|yuv| {
                let (width, height) = yuv.dimensions();
                let (y_stride, u_stride, v_stride) = yuv.strides();
                let mut data = BytesMut::with_capacity(width * height * 3 / 2);
                copy_plane(&mut data, yuv.y(), y_stride, width, height);
                copy_plane(&mut data, yuv.u(), u_stride, width / 2, height / 2);
                copy_plane(&mut data, yuv.v(), v_stride, width / 2, height / 2);
                FramePayload::I420 {
                    width: width as u32,
                    height: height as u32,
                    data: data.freeze(),
                }
            })
        };

        self.record_decode_time(start.elapsed().as_micros() as u64);

        // Parameter-set-only input produces no picture
        let Some(picture) = picture else {
            return Ok(());
        };
        self.emit(DecodedFrame::new(
            MediaType::Video,
            packet.timestamp_us.unwrap_or(0),
            packet.is_keyframe(),
            picture,
        ))
    }

    fn emit(&mut self, frame: DecodedFrame) -> DecoderResult<()> {
        let sequence = self.sink.emit(frame)?;
        self.outstanding.insert(sequence);
        self.stats.frames_emitted += 1;
        Ok(())
    }

    fn record_decode_time(&mut self, micros: u64) {
        if self.decode_times.len() == DECODE_TIME_WINDOW {
            self.decode_times.pop_front();
        }
        self.decode_times.push_back(micros);
        self.stats.avg_decode_time_us =
            self.decode_times.iter().sum::<u64>() / self.decode_times.len() as u64;
    }
}

fn copy_plane(dst: &mut BytesMut, plane: &[u8], stride: usize, width: usize, height: usize) {
    for row in plane.chunks(stride.max(1)).take(height) {
        dst.put_slice(&row[..width.min(row.len())]);
    }
}

impl DecoderAdapter for OpenH264Decoder {
    fn kind(&self) -> DecoderKind {
        DecoderKind::Software
    }

    fn configure(&mut self, descriptor: &CodecDescriptor) -> DecoderResult<()> {
        match descriptor.codec {
            CodecId::H264 => {
                info!(
                    config_len = descriptor.config.len(),
                    "Configuring OpenH264 decoder"
                );
                self.decoder = Self::create_decoder()?;
                if !descriptor.config.is_empty() {
                    self.decoder
                        .decode(&descriptor.config)
                        .map_err(|e| DecoderError::DecodeFailed(e.to_string()))?;
                }
                self.video_configured = true;
            }
            CodecId::Aac => {
                debug!("AAC will be forwarded undecoded");
                self.audio_configured = true;
            }
        }
        Ok(())
    }

    fn submit(&mut self, packet: &MediaPacket) -> DecoderResult<()> {
        self.stats.packets_submitted += 1;

        let configured = match packet.media_type {
            MediaType::Video => self.video_configured,
            MediaType::Audio => self.audio_configured,
        };
        if !configured {
            self.stats.decode_errors += 1;
            return Err(DecoderError::NotConfigured(packet.media_type));
        }

        let result = match packet.media_type {
            MediaType::Video => self.decode_video(packet),
            MediaType::Audio => self.emit(DecodedFrame::new(
                MediaType::Audio,
                packet.timestamp_us.unwrap_or(0),
                true,
                FramePayload::Encoded(packet.payload.clone()),
            )),
        };
        if result.is_err() {
            self.stats.decode_errors += 1;
        }
        result
    }

    fn release(&mut self, frame: DecodedFrame) {
        if self.outstanding.remove(&frame.sequence) {
            self.stats.frames_released += 1;
        }
    }

    fn reset(&mut self) {
        debug!("Resetting OpenH264 decoder");
        match Self::create_decoder() {
            Ok(decoder) => self.decoder = decoder,
            Err(e) => debug!("Keeping previous decoder instance: {}", e),
        }
        // Parameter sets went with the old instance
        self.video_configured = false;
    }

    fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_outstanding: self.outstanding.len() as u64,
            ..self.stats.clone()
        }
    }
}
