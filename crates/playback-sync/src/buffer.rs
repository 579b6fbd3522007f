//! Buffer state shared between the demux path and the clock
//!
//! The frame-arrival path is the only writer. The clock timer reads a
//! consistent snapshot without taking a lock: writes are bracketed by a
//! sequence counter and a reader retries while a write is in progress.

use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};
use std::time::{Duration, Instant};

/// Point-in-time view of the playback buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferState {
    /// Media queued ahead of the playback position
    pub buffered_duration_sec: f64,
    /// Presentation time of the last presented frame
    pub playback_position_sec: f64,
    pub last_update: Instant,
}

impl BufferState {
    pub fn empty(at: Instant) -> Self {
        Self {
            buffered_duration_sec: 0.0,
            playback_position_sec: 0.0,
            last_update: at,
        }
    }
}

struct Shared {
    epoch: Instant,
    sequence: AtomicU64,
    buffered_bits: AtomicU64,
    position_bits: AtomicU64,
    updated_nanos: AtomicU64,
}

/// Create the writer/reader pair for one session
pub fn buffer_cell() -> (BufferWriter, BufferReader) {
    let shared = Arc::new(Shared {
        epoch: Instant::now(),
        sequence: AtomicU64::new(0),
        buffered_bits: AtomicU64::new(0f64.to_bits()),
        position_bits: AtomicU64::new(0f64.to_bits()),
        updated_nanos: AtomicU64::new(0),
    });
    (
        BufferWriter {
            shared: shared.clone(),
        },
        BufferReader { shared },
    )
}

/// Exclusive write handle. Not `Clone`: there is one writer per session.
pub struct BufferWriter {
    shared: Arc<Shared>,
}

impl BufferWriter {
    /// Publish a new buffer state
    pub fn publish(&mut self, buffered_duration_sec: f64, playback_position_sec: f64, at: Instant) {
        let shared = &self.shared;
        let updated = at.saturating_duration_since(shared.epoch).as_nanos() as u64;

        let sequence = shared.sequence.load(Ordering::Relaxed);
        shared.sequence.store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        shared
            .buffered_bits
            .store(buffered_duration_sec.to_bits(), Ordering::Relaxed);
        shared
            .position_bits
            .store(playback_position_sec.to_bits(), Ordering::Relaxed);
        shared.updated_nanos.store(updated, Ordering::Relaxed);

        shared
            .sequence
            .store(sequence.wrapping_add(2), Ordering::Release);
    }

    pub fn reader(&self) -> BufferReader {
        BufferReader {
            shared: self.shared.clone(),
        }
    }
}

/// Lock-free snapshot reader
#[derive(Clone)]
pub struct BufferReader {
    shared: Arc<Shared>,
}

impl BufferReader {
    /// Read a state that was published as a whole
    pub fn snapshot(&self) -> BufferState {
        let shared = &self.shared;
        loop {
            let before = shared.sequence.load(Ordering::Acquire);
            if before & 1 == 1 {
                hint::spin_loop();
                continue;
            }

            let buffered = shared.buffered_bits.load(Ordering::Relaxed);
            let position = shared.position_bits.load(Ordering::Relaxed);
            let updated = shared.updated_nanos.load(Ordering::Relaxed);

            fence(Ordering::Acquire);
            if shared.sequence.load(Ordering::Relaxed) == before {
                return BufferState {
                    buffered_duration_sec: f64::from_bits(buffered),
                    playback_position_sec: f64::from_bits(position),
                    last_update: shared.epoch + Duration::from_nanos(updated),
                };
            }
        }
    }
}
