//! Session runtime
//!
//! Two tasks per session:
//! - pipeline: bytes -> packets -> routed events -> decoder -> scheduler ->
//!   `SessionEvent::Frame`. Sole writer of the buffer state and of the
//!   codec descriptors.
//! - clock: polls the buffer state every `check_state_interval_ms`, and at
//!   the current state's timeout, and publishes the decision independent of
//!   packet arrival.

use std::sync::Arc;
use std::time::Duration;

use decoder::{
    DecodedFrame, DecoderAdapter, FrameStream, MediaPipeline, create_decoder, frame_channel,
};
use futures::StreamExt;
use mirror_protocol::Packet;
use parking_lot::{Mutex, RwLock};
use playback_sync::{
    BufferReader, BufferWriter, FrameScheduler, PlaybackClock, PlaybackState,
    PresentationInstruction, buffer_cell,
};
use stream_demux::{DemuxCounters, FramingError, PacketFramer, StreamRouter};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{SessionConfig, SessionEvent, SessionId, SessionResult, SessionStats};

/// State visible through the session handle
struct Shared {
    state: RwLock<PlaybackState>,
    stats: Mutex<SessionStats>,
    demux: Arc<DemuxCounters>,
}

/// Clock task -> pipeline task
enum ClockNotice {
    /// A new decision was published
    Decision,
    /// Recovery timed out; discard to the next keyframe
    HardResync,
}

/// Handle to a running mirrored session.
///
/// Dropping the handle tears the session down.
pub struct MirrorSession {
    id: SessionId,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    returns: mpsc::UnboundedSender<DecodedFrame>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MirrorSession {
    /// Start a session reading the mirrored stream from `reader`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<R>(reader: R, config: SessionConfig) -> SessionResult<(Self, mpsc::Receiver<SessionEvent>)>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        config.validate()?;
        let (sink, frames) = frame_channel();
        let decoder = create_decoder(config.decoder, sink)?;
        Self::start_with_decoder(reader, decoder, frames, config)
    }

    /// Start a session with a caller-provided backend emitting into `frames`
    pub fn start_with_decoder<R>(
        reader: R,
        decoder: Box<dyn DecoderAdapter>,
        frames: FrameStream,
        config: SessionConfig,
    ) -> SessionResult<(Self, mpsc::Receiver<SessionEvent>)>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        config.validate()?;

        let id = SessionId::new();
        info!(
            session = %id,
            decoder = %decoder.kind(),
            fps = config.playback.frames_per_second,
            "Starting mirror session"
        );

        let counters = Arc::new(DemuxCounters::new());
        let shared = Arc::new(Shared {
            state: RwLock::new(PlaybackState::Starting),
            stats: Mutex::new(SessionStats::default()),
            demux: counters.clone(),
        });
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (return_tx, return_rx) = mpsc::unbounded_channel();

        let clock = PlaybackClock::new(config.playback.clone(), Instant::now().into_std());
        let (writer, reader_half) = buffer_cell();

        let framer = PacketFramer::with_counters(config.framer, counters.clone());
        let packets = FramedRead::new(reader, framer);
        let pipeline = Pipeline {
            router: StreamRouter::new(counters),
            media: MediaPipeline::new(decoder, config.playback.frames_per_second),
            scheduler: FrameScheduler::new(&config.playback, clock.decisions()),
            frame_interval: config.playback.frame_interval(),
            buffer: writer,
            events: event_tx.clone(),
            shared: shared.clone(),
        };

        let channels = PipelineChannels {
            frames,
            notices: notice_rx,
            returns: return_rx,
        };
        let pipeline_task = tokio::spawn(pipeline.run(packets, channels, cancel.clone()));
        let clock_task = tokio::spawn(run_clock(
            clock,
            reader_half,
            notice_tx,
            event_tx,
            shared.clone(),
            cancel.clone(),
        ));

        let session = Self {
            id,
            shared,
            cancel,
            returns: return_tx,
            tasks: Mutex::new(vec![pipeline_task, clock_task]),
        };
        Ok((session, event_rx))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get current playback state
    pub fn state(&self) -> PlaybackState {
        *self.shared.state.read()
    }

    /// Get current session stats
    pub fn stats(&self) -> SessionStats {
        let mut stats = self.shared.stats.lock().clone();
        stats.state = self.state();
        stats.demux = self.shared.demux.snapshot();
        stats
    }

    /// Hand a presented frame back to the decoder backend
    pub fn release(&self, frame: DecodedFrame) {
        if self.returns.send(frame).is_err() {
            debug!(session = %self.id, "Session already stopped, frame dropped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop both tasks and wait for queued frames to be released
    pub async fn stop(&self) {
        info!(session = %self.id, "Stopping mirror session");
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(session = %self.id, "Session task failed: {}", e);
            }
        }
    }
}

impl Drop for MirrorSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PipelineChannels {
    frames: FrameStream,
    notices: mpsc::UnboundedReceiver<ClockNotice>,
    returns: mpsc::UnboundedReceiver<DecodedFrame>,
}

struct Pipeline {
    router: StreamRouter,
    media: MediaPipeline,
    scheduler: FrameScheduler,
    frame_interval: Duration,
    buffer: BufferWriter,
    events: mpsc::Sender<SessionEvent>,
    shared: Arc<Shared>,
}

impl Pipeline {
    async fn run<R>(
        mut self,
        mut packets: FramedRead<R, PacketFramer>,
        mut channels: PipelineChannels,
        cancel: CancellationToken,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut input_open = true;
        let mut last_presented = Instant::now();

        loop {
            let due = self.scheduler.next_delay().map(|delay| last_presented + delay);

            let keep_going = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                Some(notice) = channels.notices.recv() => {
                    self.on_clock(notice);
                    true
                }
                Some(frame) = channels.returns.recv() => {
                    self.media.release(frame);
                    true
                }
                Some(frame) = channels.frames.recv() => {
                    self.on_frame(frame);
                    true
                }
                _ = time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                    match self.scheduler.pop_next() {
                        Some(scheduled) => {
                            last_presented = self.pacing_anchor(due);
                            self.emit(SessionEvent::Frame(scheduled.frame)).await
                        }
                        None => true,
                    }
                }
                packet = packets.next(), if input_open => match packet {
                    Some(Ok(packet)) => self.on_packet(packet).await,
                    Some(Err(FramingError::TruncatedStream { buffered })) => {
                        warn!(buffered, "Stream truncated mid-frame");
                        self.emit(SessionEvent::StreamTruncated { buffered_bytes: buffered }).await
                    }
                    Some(Err(e)) => {
                        warn!("Stream read failed: {}", e);
                        true
                    }
                    None => {
                        info!("Stream ended, playing out queued frames");
                        input_open = false;
                        self.scheduler.end_of_stream();
                        true
                    }
                },
            };

            self.release_discarded();
            self.publish_buffer();

            if !keep_going {
                break;
            }
            if !input_open && self.scheduler.queued() == 0 && channels.frames.is_empty() {
                self.emit(SessionEvent::StreamEnded).await;
                break;
            }
        }

        self.teardown(&mut channels);
        cancel.cancel();
    }

    /// Presentation instant the next delay counts from.
    ///
    /// Stays on the deadline grid so timer lateness does not accumulate,
    /// unless presentation fell behind by more than a frame.
    fn pacing_anchor(&self, due: Option<Instant>) -> Instant {
        let now = Instant::now();
        match due {
            Some(due) if now.saturating_duration_since(due) <= self.frame_interval => due,
            _ => now,
        }
    }

    async fn on_packet(&mut self, packet: Packet) -> bool {
        let routed = match self.router.route(packet) {
            Ok(routed) => routed,
            // Counted by the router; the stream continues
            Err(_) => return true,
        };

        for event in routed {
            if let Err(e) = self.media.handle(event) {
                if !self.emit(SessionEvent::DecoderError(e.to_string())).await {
                    return false;
                }
            }
        }
        true
    }

    fn on_frame(&mut self, frame: DecodedFrame) {
        let sequence = frame.sequence;
        if let PresentationInstruction::Drop { pts_us, reason } = self.scheduler.schedule(frame) {
            debug!(sequence, pts_us, ?reason, "Frame dropped");
        }
    }

    fn on_clock(&mut self, notice: ClockNotice) {
        if let ClockNotice::HardResync = notice {
            self.scheduler.hard_resync();
            self.media.flush_to_keyframe();
        }
        if let Some(decision) = self.scheduler.sync_decision() {
            debug!(?decision, "Applied clock decision");
        }
    }

    /// Send an event; false once the receiver is gone
    async fn emit(&mut self, event: SessionEvent) -> bool {
        match self.events.send(event).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                if let SessionEvent::Frame(frame) = event {
                    self.media.release(frame);
                }
                debug!("Event receiver dropped");
                false
            }
        }
    }

    fn release_discarded(&mut self) {
        for frame in self.scheduler.take_discarded() {
            self.media.release(frame);
        }
    }

    fn publish_buffer(&mut self) {
        let buffered = self.scheduler.buffered_duration_sec();
        self.buffer.publish(
            buffered,
            self.scheduler.playback_position_sec(),
            Instant::now().into_std(),
        );

        let mut stats = self.shared.stats.lock();
        stats.buffered_sec = buffered;
        stats.pipeline = self.media.stats();
        stats.decoder = self.media.decoder_stats();
        stats.scheduler = self.scheduler.stats();
    }

    /// Hand every frame still owned by the session back to the decoder
    fn teardown(&mut self, channels: &mut PipelineChannels) {
        channels.frames.close();
        channels.returns.close();
        let mut released = 0usize;
        while let Ok(frame) = channels.frames.try_recv() {
            self.media.release(frame);
            released += 1;
        }
        while let Ok(frame) = channels.returns.try_recv() {
            self.media.release(frame);
        }
        for frame in self.scheduler.drain() {
            self.media.release(frame);
            released += 1;
        }

        let mut stats = self.shared.stats.lock();
        stats.decoder = self.media.decoder_stats();
        stats.scheduler = self.scheduler.stats();
        info!(released, "Session pipeline stopped");
    }
}

async fn run_clock(
    mut clock: PlaybackClock,
    buffer: BufferReader,
    notices: mpsc::UnboundedSender<ClockNotice>,
    events: mpsc::Sender<SessionEvent>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(clock.config().check_state_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = clock.next_deadline().map(Instant::from_std);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
        }

        let snapshot = buffer.snapshot();
        let outcome = clock.poll(&snapshot, Instant::now().into_std());

        *shared.state.write() = outcome.state;
        {
            let mut stats = shared.stats.lock();
            stats.drift_sec = outcome.drift_sec;
            if outcome.recovery_timeout.is_some() {
                stats.recovery_timeouts += 1;
            }
        }

        let notice = if outcome.recovery_timeout.is_some() {
            ClockNotice::HardResync
        } else {
            ClockNotice::Decision
        };
        if notices.send(notice).is_err() {
            break;
        }

        // The clock never blocks on a slow event consumer
        if outcome.changed() {
            try_emit(&events, SessionEvent::StateChanged(outcome.state));
        }
        if let Some(event) = outcome.recovery_timeout {
            try_emit(&events, SessionEvent::RecoveryTimeout(event));
        }
    }
    debug!("Playback clock stopped");
}

fn try_emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(event)) => debug!(?event, "Event channel full, dropping clock event"),
    }
}
