//! Packet framing
//!
//! One framer serves both entry points: bytes pushed as they arrive
//! ([`PacketFramer::push`] / [`PacketFramer::next_packet`]), or a byte source
//! wrapped as `FramedRead::new(source, PacketFramer::default())`, which
//! yields a lazy stream of packets. Corrupt headers are dropped and counted
//! without ending the stream; only a truncated tail or an IO error does.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use mirror_protocol::{DEFAULT_MAX_PAYLOAD, FrameLayout, Packet};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::{DemuxCounters, FramingError, FramingResult};

/// Framer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Largest payload a frame may declare before it is treated as corrupt
    pub max_payload: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Cut one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while the header or the payload is still incomplete.
/// On error nothing is consumed; the caller decides how to resynchronize.
fn decode_frame(buf: &mut BytesMut, max_payload: usize) -> FramingResult<Option<Packet>> {
    let Some(&tag) = buf.first() else {
        return Ok(None);
    };

    let layout = FrameLayout::for_tag(tag);
    let header_len = layout.header_len();
    if buf.len() < header_len {
        return Ok(None);
    }

    let mut header = &buf[1..header_len];
    let timestamp_us = match layout {
        FrameLayout::Legacy => None,
        FrameLayout::Multiplexed => Some(header.get_u64()),
    };
    let len = header.get_u32() as usize;

    if len > max_payload {
        return Err(FramingError::PayloadTooLarge {
            tag,
            size: len,
            max: max_payload,
        });
    }

    if buf.len() < header_len + len {
        buf.reserve(header_len + len - buf.len());
        return Ok(None);
    }

    buf.advance(header_len);
    let payload = buf.split_to(len).freeze();

    Ok(Some(Packet {
        tag,
        timestamp_us,
        payload,
    }))
}

/// Next packet in `buf`, or the error for a corrupt header.
///
/// A corrupt header costs one byte: the tag byte is dropped so the next
/// call rescans from the byte after it.
fn next_frame(
    buf: &mut BytesMut,
    config: &FramerConfig,
    counters: &DemuxCounters,
) -> Option<FramingResult<Packet>> {
    match decode_frame(buf, config.max_payload) {
        Ok(Some(packet)) => {
            counters.packet_framed();
            Some(Ok(packet))
        }
        Ok(None) => None,
        Err(e) => {
            debug!("Dropping malformed frame header: {}", e);
            buf.advance(1);
            counters.malformed_frame();
            Some(Err(e))
        }
    }
}

/// Packet framer, push-driven or as a `tokio_util` codec.
///
/// Pushed bytes are held in the framer's own buffer; as a codec it frames
/// the buffer `FramedRead` hands it.
#[derive(Debug)]
pub struct PacketFramer {
    buffer: BytesMut,
    config: FramerConfig,
    counters: Arc<DemuxCounters>,
}

impl PacketFramer {
    pub fn new(config: FramerConfig) -> Self {
        Self::with_counters(config, Arc::new(DemuxCounters::new()))
    }

    pub fn with_counters(config: FramerConfig, counters: Arc<DemuxCounters>) -> Self {
        Self {
            buffer: BytesMut::new(),
            config,
            counters,
        }
    }

    /// Append newly received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete packet, or a framing error for a corrupt header.
    ///
    /// Returns `None` when more bytes are needed.
    pub fn next_packet(&mut self) -> Option<FramingResult<Packet>> {
        next_frame(&mut self.buffer, &self.config, &self.counters)
    }

    /// Signal that the byte source has ended.
    ///
    /// Fails with `TruncatedStream` if a partial frame is pending; the
    /// partial bytes are discarded so the framer can be reattached.
    pub fn finish(&mut self) -> FramingResult<()> {
        truncated_tail(&mut self.buffer)
    }

    /// Bytes received but not yet framed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn counters(&self) -> &Arc<DemuxCounters> {
        &self.counters
    }
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self::new(FramerConfig::default())
    }
}

fn truncated_tail(buf: &mut BytesMut) -> FramingResult<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let buffered = buf.len();
    buf.clear();
    warn!(buffered, "Stream ended mid-frame");
    Err(FramingError::TruncatedStream { buffered })
}

impl Decoder for PacketFramer {
    type Item = Packet;
    type Error = FramingError;

    /// Corrupt headers are skipped here; the stream only sees packets
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, FramingError> {
        loop {
            match next_frame(src, &self.config, &self.counters) {
                Some(Ok(packet)) => return Ok(Some(packet)),
                Some(Err(_)) => continue,
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, FramingError> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        truncated_tail(src)?;
        Ok(None)
    }
}

impl Encoder<Packet> for PacketFramer {
    type Error = FramingError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), FramingError> {
        packet.encode(dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use mirror_protocol::PacketType;
    use proptest::prelude::*;
    use tokio_util::codec::FramedRead;

    fn encode_all(packets: &[Packet]) -> Vec<u8> {
        packets
            .iter()
            .flat_map(|p| p.to_bytes().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_partial_arrivals() {
        let packets = vec![
            Packet::new(PacketType::VideoKeyFrameH264, Some(1_000), vec![0, 0, 1, 0x65, 0xAA]),
            Packet::new(PacketType::LegacyAudioAacAdts, None, vec![0xFF, 0xF1, 0x50]),
        ];
        let wire = encode_all(&packets);

        let mut framer = PacketFramer::default();
        let mut out = Vec::new();
        for byte in &wire {
            framer.push(std::slice::from_ref(byte));
            while let Some(result) = framer.next_packet() {
                out.push(result.unwrap());
            }
        }

        assert_eq!(out, packets);
        assert_eq!(framer.buffered(), 0);
        assert!(framer.finish().is_ok());
        assert_eq!(framer.counters().snapshot().packets_framed, 2);
    }

    #[test]
    fn test_truncated_stream() {
        let wire = Packet::new(PacketType::VideoDeltaFrameH264, Some(5), vec![1, 2, 3, 4])
            .to_bytes()
            .unwrap();

        let mut framer = PacketFramer::default();
        framer.push(&wire[..wire.len() - 2]);
        assert!(framer.next_packet().is_none());

        match framer.finish() {
            Err(FramingError::TruncatedStream { buffered }) => {
                assert_eq!(buffered, wire.len() - 2)
            }
            other => panic!("expected truncated stream, got {:?}", other),
        }
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_oversized_length_is_dropped() {
        let config = FramerConfig { max_payload: 16 };
        let mut framer = PacketFramer::new(config);

        // Legacy header declaring 0xFFFFFFFF bytes
        framer.push(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF]);
        match framer.next_packet() {
            Some(Err(FramingError::PayloadTooLarge { tag, size, max })) => {
                assert_eq!(tag, 0x01);
                assert_eq!(size, u32::MAX as usize);
                assert_eq!(max, 16);
            }
            other => panic!("expected oversized frame, got {:?}", other),
        }
        assert_eq!(framer.counters().snapshot().malformed_frames, 1);
        assert_eq!(framer.buffered(), 4);

        // Leftover garbage is reported on detach; a fresh source frames cleanly.
        assert!(framer.next_packet().is_none());
        assert!(matches!(
            framer.finish(),
            Err(FramingError::TruncatedStream { buffered: 4 })
        ));

        let valid = Packet::new(PacketType::AudioFrameAac, Some(7), vec![9, 9]);
        framer.push(&valid.to_bytes().unwrap());
        assert_eq!(framer.next_packet().unwrap().unwrap(), valid);
    }

    #[test]
    fn test_empty_payload() {
        let packet = Packet::new(PacketType::VideoConfigH264, Some(0), Vec::new());
        let mut framer = PacketFramer::default();
        framer.push(&packet.to_bytes().unwrap());
        assert_eq!(framer.next_packet().unwrap().unwrap(), packet);
    }

    fn packet_strategy() -> impl Strategy<Value = Packet> {
        let tags = prop::sample::select(vec![0x00u8, 0x01, 0x10, 0x11, 0x12, 0x20, 0x21]);
        (tags, any::<u64>(), prop::collection::vec(any::<u8>(), 0..512)).prop_map(
            |(tag, pts, payload)| Packet {
                tag,
                timestamp_us: (tag >= 0x10).then_some(pts),
                payload: payload.into(),
            },
        )
    }

    proptest! {
        #[test]
        fn prop_frame_then_encode_reproduces_bytes(
            packets in prop::collection::vec(packet_strategy(), 0..16),
            split in 1usize..64,
        ) {
            let mut wire = BytesMut::new();
            let mut framer = PacketFramer::default();
            for packet in &packets {
                framer.encode(packet.clone(), &mut wire).unwrap();
            }
            let original = wire.clone().freeze();

            // Feed in arbitrary chunk sizes to exercise partial arrivals.
            let mut src = BytesMut::new();
            let mut decoded = Vec::new();
            for chunk in original.chunks(split) {
                src.extend_from_slice(chunk);
                while let Some(packet) = framer.decode(&mut src).unwrap() {
                    decoded.push(packet);
                }
            }
            prop_assert!(framer.decode_eof(&mut src).unwrap().is_none());
            prop_assert_eq!(&decoded, &packets);

            let mut reencoded = BytesMut::new();
            for packet in decoded {
                framer.encode(packet, &mut reencoded).unwrap();
            }
            prop_assert_eq!(reencoded.freeze(), original);
        }
    }

    #[tokio::test]
    async fn test_framed_read_stream() {
        let mut wire = BytesMut::new();
        let mut framer = PacketFramer::default();
        let first = Packet::new(PacketType::VideoConfigH264, Some(0), vec![0x68, 0x32, 0x36, 0x34]);
        let second = Packet::new(PacketType::LegacyVideoH264, None, vec![0, 0, 0, 1, 0x65]);
        framer.encode(first.clone(), &mut wire).unwrap();
        framer.encode(second.clone(), &mut wire).unwrap();
        wire.extend_from_slice(&[0x11, 0, 0]);

        let reader = std::io::Cursor::new(wire.freeze().to_vec());
        let mut stream = FramedRead::new(reader, PacketFramer::default());

        assert_eq!(stream.next().await.unwrap().unwrap(), first);
        assert_eq!(stream.next().await.unwrap().unwrap(), second);
        assert!(matches!(
            stream.next().await,
            Some(Err(FramingError::TruncatedStream { buffered: 3 }))
        ));
    }

    #[tokio::test]
    async fn test_framed_read_skips_corrupt_header() {
        let valid = Packet::new(PacketType::AudioFrameAac, Some(7), vec![9, 9]);
        // A stray legacy tag: its length field is read from the next header
        let mut wire = BytesMut::from(&[0x05][..]);
        valid.encode(&mut wire).unwrap();

        let counters = Arc::new(DemuxCounters::new());
        let framer = PacketFramer::with_counters(FramerConfig { max_payload: 16 }, counters.clone());
        let mut stream = FramedRead::new(std::io::Cursor::new(wire.to_vec()), framer);

        assert_eq!(stream.next().await.unwrap().unwrap(), valid);
        assert!(stream.next().await.is_none());
        assert_eq!(counters.snapshot().malformed_frames, 1);
        assert_eq!(counters.snapshot().packets_framed, 1);
    }
}
