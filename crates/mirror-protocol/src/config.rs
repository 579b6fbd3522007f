//! Playback tuning parameters

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ProtocolResult};

pub const CHECK_STATE_INTERVAL_MS: u64 = 500;
pub const MAX_SEEK_WAIT_MS: u64 = 1000;
pub const MAX_TIME_TO_RECOVER_MS: u64 = 200;
pub const MAX_BUFFER_SEC: f64 = 0.2;
pub const MAX_AHEAD_SEC: f64 = -0.2;
pub const DEFAULT_TARGET_BUFFER_SEC: f64 = 0.25;
pub const DEFAULT_FRAMES_PER_SECOND: u32 = 60;
pub const DEFAULT_FRAMES_PER_FRAGMENT: u32 = 1;
pub const FRAME_CHECK_INTERVAL: u32 = 2;

/// Synchronization and pacing configuration for one mirrored session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// How often the playback clock polls the buffer state
    pub check_state_interval_ms: u64,
    /// Longest time spent waiting for a drained buffer before recovering
    pub max_seek_wait_ms: u64,
    /// Longest time spent recovering before a hard re-sync
    pub max_time_to_recover_ms: u64,
    /// Drift above which the clock seeks to the live edge
    pub max_buffer_sec: f64,
    /// Drift below which the clock waits for the buffer to refill
    pub max_ahead_sec: f64,
    /// Buffered duration the clock steers towards
    pub target_buffer_sec: f64,
    /// Presentation rate
    pub frames_per_second: u32,
    /// Frames presented together as one paced fragment
    pub frames_per_fragment: u32,
    /// Frames between two reads of the clock decision
    pub frame_check_interval: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            check_state_interval_ms: CHECK_STATE_INTERVAL_MS,
            max_seek_wait_ms: MAX_SEEK_WAIT_MS,
            max_time_to_recover_ms: MAX_TIME_TO_RECOVER_MS,
            max_buffer_sec: MAX_BUFFER_SEC,
            max_ahead_sec: MAX_AHEAD_SEC,
            target_buffer_sec: DEFAULT_TARGET_BUFFER_SEC,
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            frames_per_fragment: DEFAULT_FRAMES_PER_FRAGMENT,
            frame_check_interval: FRAME_CHECK_INTERVAL,
        }
    }
}

impl PlaybackConfig {
    pub fn check_state_interval(&self) -> Duration {
        Duration::from_millis(self.check_state_interval_ms)
    }

    pub fn max_seek_wait(&self) -> Duration {
        Duration::from_millis(self.max_seek_wait_ms)
    }

    pub fn max_time_to_recover(&self) -> Duration {
        Duration::from_millis(self.max_time_to_recover_ms)
    }

    /// Buffered duration presentation resumes at after a pause
    pub fn target_buffer(&self) -> Duration {
        Duration::try_from_secs_f64(self.target_buffer_sec).unwrap_or_default()
    }

    /// Duration of a single frame at the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frames_per_second.max(1) as f64)
    }

    /// Reject settings the clock or the scheduler cannot run with
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.check_state_interval_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "check_state_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.max_ahead_sec < self.max_buffer_sec) {
            return Err(ProtocolError::InvalidConfig(format!(
                "max_ahead_sec ({}) must be below max_buffer_sec ({})",
                self.max_ahead_sec, self.max_buffer_sec
            )));
        }
        if !self.target_buffer_sec.is_finite() || self.target_buffer_sec < 0.0 {
            return Err(ProtocolError::InvalidConfig(
                "target_buffer_sec must be a non-negative number".to_string(),
            ));
        }
        if self.frames_per_second == 0 {
            return Err(ProtocolError::InvalidConfig(
                "frames_per_second must be positive".to_string(),
            ));
        }
        if self.frames_per_fragment == 0 {
            return Err(ProtocolError::InvalidConfig(
                "frames_per_fragment must be positive".to_string(),
            ));
        }
        if self.frame_check_interval == 0 {
            return Err(ProtocolError::InvalidConfig(
                "frame_check_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
