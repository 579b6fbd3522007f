//! Session identifiers, events and statistics

use std::fmt;

use decoder::{DecodedFrame, DecoderStats, PipelineStats};
use playback_sync::{PlaybackState, RecoveryTimeoutEvent, SchedulerStats};
use serde::{Deserialize, Serialize};
use stream_demux::DemuxStats;
use uuid::Uuid;

/// Unique identifier of a mirrored session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group is enough to tell sessions apart in logs
        let id = self.0.simple().to_string();
        f.write_str(&id[..8])
    }
}

/// Events delivered to the session owner
#[derive(Debug)]
pub enum SessionEvent {
    /// A frame is due for presentation; ownership passes to the receiver
    Frame(DecodedFrame),
    StateChanged(PlaybackState),
    RecoveryTimeout(RecoveryTimeoutEvent),
    /// The decoder rejected a packet or could not be configured
    DecoderError(String),
    /// The byte source ended mid-frame; reconnecting is up to the owner
    StreamTruncated { buffered_bytes: usize },
    StreamEnded,
}

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub state: PlaybackState,
    pub buffered_sec: f64,
    pub drift_sec: f64,
    pub recovery_timeouts: u64,
    pub demux: DemuxStats,
    pub pipeline: PipelineStats,
    pub decoder: DecoderStats,
    pub scheduler: SchedulerStats,
}
