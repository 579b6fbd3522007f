//! Mirror Session - one mirrored device stream, end to end
//!
//! Wires the demuxer, the decoder backend and the synchronization engine
//! into two tasks: a push-driven pipeline task and a timer-driven clock
//! task that share only the buffer state.

mod config;
mod error;
mod events;
mod session;

pub use config::*;
pub use error::*;
pub use events::*;
pub use session::*;

/// Default capacity of the session event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
