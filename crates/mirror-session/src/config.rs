//! Session configuration

use std::path::Path;

use decoder::DecoderKind;
use mirror_protocol::PlaybackConfig;
use serde::{Deserialize, Serialize};
use stream_demux::FramerConfig;

use crate::{DEFAULT_EVENT_CAPACITY, SessionError, SessionResult};

/// Configuration of one mirrored session.
///
/// Every field may be omitted from JSON and falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub playback: PlaybackConfig,
    pub framer: FramerConfig,
    pub decoder: DecoderKind,
    /// Capacity of the event channel handed to the caller
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            framer: FramerConfig::default(),
            decoder: DecoderKind::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> SessionResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SessionResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> SessionResult<()> {
        self.playback.validate()?;
        if self.framer.max_payload == 0 {
            return Err(SessionError::InvalidConfig(
                "framer.max_payload must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(SessionError::InvalidConfig(
                "event_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
