//! Frame presentation pacing

use std::collections::VecDeque;
use std::time::Duration;

use decoder::DecodedFrame;
use mirror_protocol::PlaybackConfig;
use serde::Serialize;
use tracing::debug;

use crate::{ClockDecision, DecisionCell, us_to_sec};

/// Why frames are being discarded until the next keyframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Catching up with the live edge
    SeekToLive,
    /// Re-synchronizing after a recovery timeout
    HardResync,
}

/// Scheduling verdict for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationInstruction {
    /// Queued; present `delay` after the previous fragment
    Present { pts_us: u64, delay: Duration },
    /// Queued while presentation is paused
    Hold { pts_us: u64 },
    /// Not queued; the frame is handed back for release
    Drop { pts_us: u64, reason: DropReason },
}

/// A frame ready to leave the scheduler
#[derive(Debug)]
pub struct ScheduledFrame {
    pub frame: DecodedFrame,
    /// Pacing delay since the previous presentation
    pub delay: Duration,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub frames_scheduled: u64,
    pub frames_presented: u64,
    pub frames_dropped: u64,
    pub seeks_to_live: u64,
    pub hard_resyncs: u64,
    /// Pauses lifted because the queue reached the target buffer
    pub refills: u64,
}

/// Paces decoded frames at the target rate, in fragments.
///
/// The clock decision is re-read on the first frame and then every
/// `frame_check_interval` frames, or explicitly via [`FrameScheduler::sync_decision`].
/// Each published decision is applied once. A WAIT or RECOVER pause lasts
/// until the queue holds the target buffer or the clock says otherwise.
pub struct FrameScheduler {
    decisions: DecisionCell,
    fragment_duration: Duration,
    frames_per_fragment: u32,
    frame_check_interval: u64,
    frame_interval_us: u64,
    target_buffer: Duration,
    queue: VecDeque<ScheduledFrame>,
    discarded: Vec<DecodedFrame>,
    applied_generation: u64,
    paused: bool,
    ended: bool,
    /// Set while video is discarded up to the next keyframe
    resync: Option<DropReason>,
    video_frames_accepted: u64,
    playback_position_us: u64,
    stats: SchedulerStats,
}

impl FrameScheduler {
    pub fn new(config: &PlaybackConfig, decisions: DecisionCell) -> Self {
        let frames_per_fragment = config.frames_per_fragment.max(1);
        let frame_interval = config.frame_interval();
        Self {
            decisions,
            fragment_duration: frame_interval * frames_per_fragment,
            frames_per_fragment,
            frame_check_interval: u64::from(config.frame_check_interval.max(1)),
            frame_interval_us: frame_interval.as_micros() as u64,
            target_buffer: config.target_buffer(),
            queue: VecDeque::new(),
            discarded: Vec::new(),
            applied_generation: 0,
            paused: false,
            ended: false,
            resync: None,
            video_frames_accepted: 0,
            playback_position_us: 0,
            stats: SchedulerStats::default(),
        }
    }

    /// Take ownership of a decoded frame and decide what happens to it
    pub fn schedule(&mut self, frame: DecodedFrame) -> PresentationInstruction {
        if self.stats.frames_scheduled % self.frame_check_interval == 0 {
            self.sync_decision();
        }
        self.stats.frames_scheduled += 1;

        let pts_us = frame.presentation_time_us;
        if frame.is_video() {
            if frame.is_keyframe {
                self.resync = None;
            } else if let Some(reason) = self.resync {
                self.discard(frame);
                return PresentationInstruction::Drop { pts_us, reason };
            }
        }

        let delay = self.pacing_delay(&frame);
        self.queue.push_back(ScheduledFrame { frame, delay });
        self.resume_if_refilled();

        if self.paused {
            PresentationInstruction::Hold { pts_us }
        } else {
            PresentationInstruction::Present { pts_us, delay }
        }
    }

    /// Video frames are paced per fragment; audio follows video.
    fn pacing_delay(&mut self, frame: &DecodedFrame) -> Duration {
        if !frame.is_video() {
            return Duration::ZERO;
        }
        let index = self.video_frames_accepted;
        self.video_frames_accepted += 1;
        if index == 0 || index % u64::from(self.frames_per_fragment) != 0 {
            Duration::ZERO
        } else {
            self.fragment_duration
        }
    }

    /// Apply the clock's latest decision if it has not been applied yet
    pub fn sync_decision(&mut self) -> Option<ClockDecision> {
        if self.ended {
            return None;
        }
        let (generation, decision) = self.decisions.load();
        if generation == 0 || generation == self.applied_generation {
            return None;
        }
        self.applied_generation = generation;

        match decision {
            ClockDecision::Continue => self.paused = false,
            ClockDecision::Wait | ClockDecision::Recover => {
                self.paused = true;
                self.resume_if_refilled();
            }
            ClockDecision::SeekToLive => {
                self.paused = false;
                self.seek_to_live();
            }
        }
        Some(decision)
    }

    fn resume_if_refilled(&mut self) {
        if self.paused && self.buffered_duration() >= self.target_buffer {
            self.paused = false;
            self.stats.refills += 1;
            debug!(queued = self.queue.len(), "Buffer refilled, resuming presentation");
        }
    }

    /// Drop queued video backlog and resume at the newest queued keyframe.
    ///
    /// Video queued after that keyframe is kept. Without a queued keyframe
    /// every queued video frame goes and presentation resumes at the next
    /// keyframe to arrive.
    fn seek_to_live(&mut self) {
        self.stats.seeks_to_live += 1;

        let resume_at = self
            .queue
            .iter()
            .rposition(|s| s.frame.is_video() && s.frame.is_keyframe);

        let before = self.discarded.len();
        let queue = std::mem::take(&mut self.queue);
        for (index, mut scheduled) in queue.into_iter().enumerate() {
            let keep = match resume_at {
                _ if !scheduled.frame.is_video() => true,
                Some(resume) => index >= resume,
                None => false,
            };
            if !keep {
                self.discard(scheduled.frame);
                continue;
            }
            if Some(index) == resume_at || !scheduled.frame.is_video() {
                scheduled.delay = Duration::ZERO;
            }
            self.queue.push_back(scheduled);
        }
        self.resync = resume_at.is_none().then_some(DropReason::SeekToLive);

        debug!(
            dropped = self.discarded.len() - before,
            awaiting_keyframe = self.resync.is_some(),
            "Seeking to live edge"
        );
    }

    /// Discard buffered delta frames and wait for the next keyframe
    pub fn hard_resync(&mut self) {
        self.stats.hard_resyncs += 1;
        let queue = std::mem::take(&mut self.queue);
        for scheduled in queue {
            if scheduled.frame.is_video() && !scheduled.frame.is_keyframe {
                self.discard(scheduled.frame);
            } else {
                self.queue.push_back(scheduled);
            }
        }
        self.resync = Some(DropReason::HardResync);
    }

    fn discard(&mut self, frame: DecodedFrame) {
        self.stats.frames_dropped += 1;
        self.discarded.push(frame);
    }

    /// Stop following the clock and let the remaining queue play out
    pub fn end_of_stream(&mut self) {
        self.ended = true;
        self.paused = false;
    }

    /// Pacing delay of the next frame, or `None` while paused or empty
    pub fn next_delay(&self) -> Option<Duration> {
        if self.paused {
            return None;
        }
        self.queue.front().map(|s| s.delay)
    }

    /// Next frame to present, or `None` while paused or empty
    pub fn pop_next(&mut self) -> Option<ScheduledFrame> {
        if self.paused {
            return None;
        }
        let scheduled = self.queue.pop_front()?;
        if scheduled.frame.is_video() {
            self.playback_position_us = scheduled.frame.presentation_time_us;
        }
        self.stats.frames_presented += 1;
        Some(scheduled)
    }

    /// Duration spanned by the queued video frames
    pub fn buffered_duration(&self) -> Duration {
        let mut video = self
            .queue
            .iter()
            .filter(|s| s.frame.is_video())
            .map(|s| s.frame.presentation_time_us);
        let Some(first) = video.next() else {
            return Duration::ZERO;
        };
        let (oldest, newest) = video.fold((first, first), |(lo, hi), pts| (lo.min(pts), hi.max(pts)));
        Duration::from_micros(newest - oldest + self.frame_interval_us)
    }

    pub fn buffered_duration_sec(&self) -> f64 {
        self.buffered_duration().as_secs_f64()
    }

    /// Presentation time of the last presented video frame
    pub fn playback_position_sec(&self) -> f64 {
        us_to_sec(self.playback_position_us)
    }

    /// Frames dropped since the last call, for release to the decoder
    pub fn take_discarded(&mut self) -> Vec<DecodedFrame> {
        std::mem::take(&mut self.discarded)
    }

    /// Empty the scheduler, returning every frame it still owns
    pub fn drain(&mut self) -> Vec<DecodedFrame> {
        let mut frames = self.take_discarded();
        frames.extend(self.queue.drain(..).map(|s| s.frame));
        frames
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_awaiting_keyframe(&self) -> bool {
        self.resync.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }
}
