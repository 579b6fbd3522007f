//! Mirror CLI
//!
//! Plays a mirrored device stream from a TCP endpoint or a capture file,
//! logging session events and periodic diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use decoder::{DecodedFrame, DecoderKind};
use mirror_protocol::{ControlMessage, KeyAction, ScreenPowerMode};
use mirror_session::{MirrorSession, SessionConfig, SessionEvent};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "mirror-cli", version, about = "Play a mirrored device stream")]
struct Args {
    /// Device stream endpoint (host:port)
    #[arg(long, conflicts_with = "file")]
    connect: Option<String>,

    /// Recorded stream to play instead of a live endpoint
    #[arg(long)]
    file: Option<PathBuf>,

    /// Session configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decoder backend: native, passthrough or software
    #[arg(long)]
    decoder: Option<DecoderKind>,

    /// Presentation rate override
    #[arg(long)]
    fps: Option<u32>,

    /// Target buffered duration in seconds
    #[arg(long)]
    target_buffer: Option<f64>,

    /// Device control endpoint (host:port)
    #[arg(long)]
    control: Option<String>,

    /// Turn the device screen off after connecting the control channel
    #[arg(long, requires = "control")]
    screen_off: bool,

    /// Wake the device after connecting the control channel
    #[arg(long, requires = "control")]
    wake: bool,

    /// Seconds between diagnostics lines
    #[arg(long, default_value_t = 5)]
    stats_interval: u64,
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied
    fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => SessionConfig::default(),
        };

        if let Some(kind) = self.decoder {
            config.decoder = kind;
        }
        if let Some(fps) = self.fps {
            config.playback.frames_per_second = fps;
        }
        if let Some(target) = self.target_buffer {
            config.playback.target_buffer_sec = target;
        }

        config.validate()?;
        Ok(config)
    }

    fn control_messages(&self) -> Vec<ControlMessage> {
        let mut messages = Vec::new();
        if self.wake {
            messages.push(ControlMessage::BackOrScreenOn { action: KeyAction::Down });
            messages.push(ControlMessage::BackOrScreenOn { action: KeyAction::Up });
        }
        if self.screen_off {
            messages.push(ControlMessage::SetScreenPowerMode(ScreenPowerMode::Off));
        }
        messages
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mirror_cli=info".parse()?)
                .add_directive("mirror_session=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = args.session_config()?;
    info!(
        decoder = %config.decoder,
        fps = config.playback.frames_per_second,
        target_buffer_sec = config.playback.target_buffer_sec,
        "Starting Mirror CLI"
    );

    // Held open for the lifetime of the session
    let _control = match &args.control {
        Some(addr) => Some(open_control(addr, &args.control_messages()).await?),
        None => None,
    };

    let stats_interval = Duration::from_secs(args.stats_interval.max(1));
    match (&args.connect, &args.file) {
        (Some(addr), _) => {
            let stream = TcpStream::connect(addr)
                .await
                .with_context(|| format!("Failed to connect to {}", addr))?;
            stream.set_nodelay(true)?;
            info!("Connected to {}", addr);
            play(stream, config, stats_interval).await
        }
        (None, Some(path)) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            info!("Playing {}", path.display());
            play(file, config, stats_interval).await
        }
        (None, None) => bail!("Either --connect or --file is required"),
    }
}

async fn open_control(addr: &str, messages: &[ControlMessage]) -> anyhow::Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect control channel to {}", addr))?;
    stream.set_nodelay(true)?;

    for message in messages {
        stream.write_all(&message.to_bytes()?).await?;
        debug!(?message, "Sent control message");
    }
    stream.flush().await?;
    info!(sent = messages.len(), "Control channel connected to {}", addr);
    Ok(stream)
}

async fn play<R>(reader: R, config: SessionConfig, stats_interval: Duration) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (session, mut events) = MirrorSession::start(reader, config)?;
    info!(session = %session.id(), "Session started");

    let mut stats_timer = tokio::time::interval(stats_interval);
    stats_timer.tick().await;
    let mut tally = FrameTally::default();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if let Some(frame) = tally.record(event) {
                        session.release(frame);
                    }
                }
                None => break,
            },
            _ = stats_timer.tick() => {
                let stats = session.stats();
                info!(
                    state = %stats.state,
                    buffered_sec = stats.buffered_sec,
                    drift_sec = stats.drift_sec,
                    video = tally.video,
                    audio = tally.audio,
                    dropped = stats.scheduler.frames_dropped,
                    "Playback"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    session.stop().await;
    info!(
        video = tally.video,
        audio = tally.audio,
        "Session finished: {}",
        serde_json::to_string(&session.stats())?
    );
    Ok(())
}

/// Presented frame counts, plus the logging of every other event
#[derive(Debug, Default)]
struct FrameTally {
    video: u64,
    audio: u64,
    bytes: u64,
}

impl FrameTally {
    /// Returns the frame to hand back to the decoder, if the event carried one
    fn record(&mut self, event: SessionEvent) -> Option<DecodedFrame> {
        match event {
            SessionEvent::Frame(frame) => {
                if frame.is_video() {
                    self.video += 1;
                } else {
                    self.audio += 1;
                }
                self.bytes += frame.data.len() as u64;
                debug!(
                    media = %frame.media_type,
                    pts_us = frame.presentation_time_us,
                    keyframe = frame.is_keyframe,
                    "Frame presented"
                );
                return Some(frame);
            }
            SessionEvent::StateChanged(state) => info!(%state, "Playback state changed"),
            SessionEvent::RecoveryTimeout(event) => warn!(
                buffered_sec = event.buffered_sec,
                drift_sec = event.drift_sec,
                "Recovery timed out after {:?}",
                event.recovering_for
            ),
            SessionEvent::DecoderError(message) => warn!("Decoder error: {}", message),
            SessionEvent::StreamTruncated { buffered_bytes } => {
                warn!(buffered_bytes, "Stream ended mid-frame")
            }
            SessionEvent::StreamEnded => info!(bytes = self.bytes, "Stream ended"),
        }
        None
    }
}
