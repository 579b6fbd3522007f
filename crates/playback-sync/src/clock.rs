//! Playback clock state machine
//!
//! Evaluated on a fixed poll interval and at state deadlines, independent of
//! packet arrival:
//!
//! ```text
//!   drift = buffered - target
//!
//!   drift <= max_ahead              -> WAITING   (pause presentation)
//!   drift >= max_buffer             -> PLAYING   + SEEK_TO_LIVE
//!   otherwise                       -> PLAYING   + CONTINUE
//!
//!   WAITING    for max_seek_wait     -> RECOVERING
//!   RECOVERING for max_time_to_recover -> hard re-sync, STARTING
//!   STARTING   primed, empty buffer for max_seek_wait -> WAITING
//! ```
//!
//! Besides the instant the current state was entered, the clock only
//! remembers whether any media was ever buffered. Until then STARTING
//! does not escalate.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mirror_protocol::PlaybackConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::BufferState;

/// Clock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No media yet, or re-synchronizing after a recovery timeout
    #[default]
    Starting,
    Playing,
    /// Buffer ran dry; presentation paused
    Waiting,
    /// Waited too long; last chance before a hard re-sync
    Recovering,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Playing => "PLAYING",
            Self::Waiting => "WAITING",
            Self::Recovering => "RECOVERING",
        };
        f.write_str(name)
    }
}

/// What the scheduler should do until the next poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ClockDecision {
    Continue = 0,
    Wait = 1,
    SeekToLive = 2,
    Recover = 3,
}

impl ClockDecision {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Wait,
            2 => Self::SeekToLive,
            3 => Self::Recover,
            _ => Self::Continue,
        }
    }
}

/// Raised when recovery did not succeed in time; observable, not an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryTimeoutEvent {
    pub buffered_sec: f64,
    pub drift_sec: f64,
    /// Time spent in RECOVERING before giving up
    pub recovering_for: Duration,
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    pub previous: PlaybackState,
    pub state: PlaybackState,
    pub decision: ClockDecision,
    pub drift_sec: f64,
    /// Set when this poll escalated to a hard re-sync
    pub recovery_timeout: Option<RecoveryTimeoutEvent>,
}

impl PollOutcome {
    pub fn changed(&self) -> bool {
        self.previous != self.state
    }
}

/// Latest clock decision, tagged with the poll that produced it.
///
/// Generation and decision share one atomic word so readers never see a
/// decision paired with the wrong generation.
#[derive(Debug, Clone, Default)]
pub struct DecisionCell {
    word: Arc<AtomicU64>,
}

impl DecisionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, decision: ClockDecision) -> u64 {
        let generation = (self.word.load(Ordering::Relaxed) >> 8) + 1;
        self.word
            .store((generation << 8) | decision as u64, Ordering::Release);
        generation
    }

    /// (generation, decision); generation 0 means nothing published yet
    pub fn load(&self) -> (u64, ClockDecision) {
        let word = self.word.load(Ordering::Acquire);
        (word >> 8, ClockDecision::from_u8(word as u8))
    }
}

/// Poll-driven synchronization state machine
pub struct PlaybackClock {
    config: PlaybackConfig,
    state: PlaybackState,
    entered_at: Instant,
    /// Set by the first poll that sees buffered media
    primed: bool,
    decisions: DecisionCell,
}

impl PlaybackClock {
    pub fn new(config: PlaybackConfig, now: Instant) -> Self {
        Self {
            config,
            state: PlaybackState::Starting,
            entered_at: now,
            primed: false,
            decisions: DecisionCell::new(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    /// Handle the scheduler reads decisions through
    pub fn decisions(&self) -> DecisionCell {
        self.decisions.clone()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Instant at which the current state times out, if it can.
    ///
    /// Polling at this instant keeps the dwell bounds exact regardless of
    /// the poll interval.
    pub fn next_deadline(&self) -> Option<Instant> {
        let bound = match self.state {
            PlaybackState::Playing => return None,
            PlaybackState::Starting if !self.primed => return None,
            PlaybackState::Starting | PlaybackState::Waiting => self.config.max_seek_wait(),
            PlaybackState::Recovering => self.config.max_time_to_recover(),
        };
        Some(self.entered_at + bound)
    }

    /// Evaluate one tick and publish the resulting decision
    pub fn poll(&mut self, buffer: &BufferState, now: Instant) -> PollOutcome {
        let buffered = buffer.buffered_duration_sec;
        let drift = buffered - self.config.target_buffer_sec;
        let elapsed = now.saturating_duration_since(self.entered_at);
        let recovered = drift > self.config.max_ahead_sec;
        let previous = self.state;
        let mut recovery_timeout = None;
        if buffered > 0.0 && !self.primed {
            debug!(buffered_sec = buffered, "First media buffered");
            self.primed = true;
        }

        let (state, decision) = match self.state {
            PlaybackState::Starting if buffered <= 0.0 => {
                if self.primed && elapsed >= self.config.max_seek_wait() {
                    (PlaybackState::Waiting, ClockDecision::Wait)
                } else {
                    (PlaybackState::Starting, ClockDecision::Wait)
                }
            }
            PlaybackState::Starting | PlaybackState::Playing => self.evaluate(drift),
            PlaybackState::Waiting if recovered => self.evaluate(drift),
            PlaybackState::Waiting => {
                if elapsed >= self.config.max_seek_wait() {
                    (PlaybackState::Recovering, ClockDecision::Recover)
                } else {
                    (PlaybackState::Waiting, ClockDecision::Wait)
                }
            }
            PlaybackState::Recovering if recovered => self.evaluate(drift),
            PlaybackState::Recovering => {
                if elapsed >= self.config.max_time_to_recover() {
                    let event = RecoveryTimeoutEvent {
                        buffered_sec: buffered,
                        drift_sec: drift,
                        recovering_for: elapsed,
                    };
                    warn!(
                        buffered_sec = buffered,
                        drift_sec = drift,
                        "Recovery timed out, re-synchronizing at next keyframe"
                    );
                    recovery_timeout = Some(event);
                    (PlaybackState::Starting, ClockDecision::Wait)
                } else {
                    (PlaybackState::Recovering, ClockDecision::Recover)
                }
            }
        };

        if state != self.state || recovery_timeout.is_some() {
            info!(from = %self.state, to = %state, drift_sec = drift, "Playback state changed");
            self.state = state;
            self.entered_at = now;
        }
        self.decisions.publish(decision);

        PollOutcome {
            previous,
            state,
            decision,
            drift_sec: drift,
            recovery_timeout,
        }
    }

    fn evaluate(&self, drift: f64) -> (PlaybackState, ClockDecision) {
        if drift <= self.config.max_ahead_sec {
            (PlaybackState::Waiting, ClockDecision::Wait)
        } else if drift >= self.config.max_buffer_sec {
            (PlaybackState::Playing, ClockDecision::SeekToLive)
        } else {
            (PlaybackState::Playing, ClockDecision::Continue)
        }
    }
}
