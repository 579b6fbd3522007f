//! Stream Demuxer - framing and routing of the mirrored media stream
//!
//! Turns the raw byte stream into typed packets and normalizes the legacy
//! and multiplexed tag schemes into one event shape:
//! - `PacketFramer`: byte stream -> `Packet`, pushed or via `FramedRead`
//! - `StreamRouter`: `Packet` -> `RoutedEvent`
//! - `keyframe`: H.264 NAL unit inspection

pub mod adts;
mod error;
mod framer;
pub mod keyframe;
mod router;
mod stats;

pub use error::*;
pub use framer::*;
pub use keyframe::is_keyframe;
pub use router::*;
pub use stats::*;
