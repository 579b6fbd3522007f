//! Playback Synchronization - keeps a live mirror close to the source
//!
//! - `BufferCell`: single-writer buffer state with lock-free snapshots
//! - `PlaybackClock`: poll-driven wait/play/seek/recover state machine
//! - `FrameScheduler`: paces decoded frames and applies clock decisions

mod buffer;
mod clock;
mod scheduler;

pub use buffer::*;
pub use clock::*;
pub use scheduler::*;

/// Microseconds to seconds
pub(crate) fn us_to_sec(us: u64) -> f64 {
    us as f64 / 1_000_000.0
}
