//! Shared Protocol Definitions for the mirroring client
//!
//! Packet tags, codec identifiers, control-channel messages and the
//! playback tuning parameters shared by the demuxer, the decoders and
//! the synchronization engine.

mod config;
mod control;
mod error;
mod packets;

pub use config::*;
pub use control::*;
pub use error::*;
pub use packets::*;

/// Header length of a legacy frame: tag + u32 length
pub const LEGACY_HEADER_LEN: usize = 1 + 4;

/// Header length of a multiplexed frame: tag + u64 pts + u32 length
pub const MUX_HEADER_LEN: usize = 1 + 8 + 4;

/// Largest payload a single frame may declare (16 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Tags below this value use the legacy single-stream header
pub const FIRST_MUX_TAG: u8 = 0x10;
