//! Diagnostic counters shared by the framer and the router

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated from the demux path
#[derive(Debug, Default)]
pub struct DemuxCounters {
    packets_framed: AtomicU64,
    malformed_frames: AtomicU64,
    unknown_packet_types: AtomicU64,
    codec_mismatches: AtomicU64,
    malformed_payloads: AtomicU64,
    descriptor_updates: AtomicU64,
}

impl DemuxCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn packet_framed(&self) {
        self.packets_framed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unknown_packet_type(&self) {
        self.unknown_packet_types.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn codec_mismatch(&self) {
        self.codec_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn malformed_payload(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn descriptor_updated(&self) {
        self.descriptor_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters
    pub fn snapshot(&self) -> DemuxStats {
        DemuxStats {
            packets_framed: self.packets_framed.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            unknown_packet_types: self.unknown_packet_types.load(Ordering::Relaxed),
            codec_mismatches: self.codec_mismatches.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            descriptor_updates: self.descriptor_updates.load(Ordering::Relaxed),
        }
    }
}

/// Demuxer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DemuxStats {
    /// Well-formed frames cut from the stream
    pub packets_framed: u64,
    /// Frame headers rejected by the framer
    pub malformed_frames: u64,
    /// Packets dropped for carrying a tag outside the known set
    pub unknown_packet_types: u64,
    /// Config packets whose codec did not match their media type
    pub codec_mismatches: u64,
    /// Packets whose payload could not be interpreted
    pub malformed_payloads: u64,
    /// Codec descriptors installed or replaced
    pub descriptor_updates: u64,
}
