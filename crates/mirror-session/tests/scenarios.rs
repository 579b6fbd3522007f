//! End-to-end playback scenarios

use std::io::Cursor;
use std::ops::Range;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use decoder::{DecodedFrame, DecoderError, FramePayload, MediaPipeline, create_decoder, frame_channel};
use mirror_protocol::{CodecDescriptor, CodecId, MediaType, Packet, PacketType, PlaybackConfig};
use mirror_session::{MirrorSession, SessionConfig, SessionEvent};
use playback_sync::{
    BufferState, ClockDecision, FrameScheduler, PlaybackClock, PlaybackState,
    PresentationInstruction,
};
use stream_demux::StreamRouter;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F];
const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80];
const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84];
const NON_IDR: &[u8] = &[0, 0, 0, 1, 0x41, 0x9A];
const AAC_LC_44100_STEREO: &[u8] = &[0x12, 0x10];
const FRAME_US: u64 = 16_666;
const FRAME_INTERVAL: Duration = Duration::from_nanos(16_666_667);

fn video_config() -> Packet {
    let descriptor = CodecDescriptor::new(CodecId::H264, [SPS, PPS].concat());
    Packet::new(PacketType::VideoConfigH264, Some(0), descriptor.to_config_payload())
}

fn audio_config() -> Packet {
    let descriptor = CodecDescriptor::new(CodecId::Aac, AAC_LC_44100_STEREO.to_vec());
    Packet::new(PacketType::AudioConfigAac, Some(0), descriptor.to_config_payload())
}

/// Config, one keyframe and `count - 1` deltas at 60 fps
fn one_second_of_video(count: u64) -> Vec<Packet> {
    let mut packets = vec![video_config()];
    for index in 0..count {
        let (packet_type, payload) = if index == 0 {
            (PacketType::VideoKeyFrameH264, IDR)
        } else {
            (PacketType::VideoDeltaFrameH264, NON_IDR)
        };
        packets.push(Packet::new(packet_type, Some(index * FRAME_US), payload.to_vec()));
    }
    packets
}

fn wire(packets: &[Packet]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    for packet in packets {
        packet.encode(&mut buf).unwrap();
    }
    buf.to_vec()
}

/// Defaults, with a seek threshold above a whole recorded stream.
///
/// A recorded stream arrives in one burst, far ahead of the live edge.
fn relaxed_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.playback.max_buffer_sec = 5.0;
    config
}

/// Device side of a live session: config, then one frame per 60 fps tick
/// with a keyframe every 60. Frames due inside `stall` are never sent.
/// The stream closes after `count` ticks.
fn spawn_live_source(
    mut device: DuplexStream,
    count: u64,
    stall: Option<Range<Duration>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Connects just after the session starts
        let start = Instant::now() + Duration::from_millis(5);
        tokio::time::sleep_until(start).await;
        device.write_all(&wire(&[video_config()])).await.unwrap();

        for index in 0..count {
            let due = FRAME_INTERVAL * index as u32;
            if stall.as_ref().is_some_and(|stall| stall.contains(&due)) {
                continue;
            }
            tokio::time::sleep_until(start + due).await;
            let (packet_type, payload) = if index % 60 == 0 {
                (PacketType::VideoKeyFrameH264, IDR)
            } else {
                (PacketType::VideoDeltaFrameH264, NON_IDR)
            };
            let packet = Packet::new(packet_type, Some(index * FRAME_US), payload.to_vec());
            device.write_all(&wire(&[packet])).await.unwrap();
        }
    })
}

/// State changes reported before the stream ended
fn state_changes(events: &[(Instant, SessionEvent)]) -> Vec<(Instant, PlaybackState)> {
    events
        .iter()
        .take_while(|(_, event)| !matches!(event, SessionEvent::StreamEnded))
        .filter_map(|(at, event)| match event {
            SessionEvent::StateChanged(state) => Some((*at, *state)),
            _ => None,
        })
        .collect()
}

async fn collect(mut events: mpsc::Receiver<SessionEvent>) -> Vec<(Instant, SessionEvent)> {
    let mut collected = Vec::new();
    while let Some(event) = events.recv().await {
        collected.push((Instant::now(), event));
    }
    collected
}

fn frames(events: &[(Instant, SessionEvent)]) -> Vec<(Instant, &DecodedFrame)> {
    events
        .iter()
        .filter_map(|(at, event)| match event {
            SessionEvent::Frame(frame) => Some((*at, frame)),
            _ => None,
        })
        .collect()
}

fn video_frame(index: u64, is_keyframe: bool) -> DecodedFrame {
    let mut frame = DecodedFrame::new(
        MediaType::Video,
        index * FRAME_US,
        is_keyframe,
        FramePayload::Encoded(Bytes::from_static(NON_IDR)),
    );
    frame.sequence = index;
    frame
}

fn buffered(seconds: f64, at: std::time::Instant) -> BufferState {
    BufferState {
        buffered_duration_sec: seconds,
        playback_position_sec: 0.0,
        last_update: at,
    }
}

#[test]
fn test_buffer_at_target_presents_every_frame_at_frame_rate() {
    let config = PlaybackConfig::default();
    let start = std::time::Instant::now();
    let mut clock = PlaybackClock::new(config.clone(), start);
    let mut scheduler = FrameScheduler::new(&config, clock.decisions());

    let outcome = clock.poll(&buffered(config.target_buffer_sec, start), start);
    assert_eq!(outcome.state, PlaybackState::Playing);
    assert_eq!(outcome.decision, ClockDecision::Continue);

    let mut paced = Duration::ZERO;
    for index in 0..60 {
        match scheduler.schedule(video_frame(index, index == 0)) {
            PresentationInstruction::Present { pts_us, delay } => {
                assert_eq!(pts_us, index * FRAME_US);
                paced += delay;
            }
            other => panic!("frame {index} not presented: {other:?}"),
        }
    }

    let mut presented = 0;
    while let Some(scheduled) = scheduler.pop_next() {
        assert_eq!(scheduled.frame.presentation_time_us, presented * FRAME_US);
        presented += 1;
    }
    assert_eq!(presented, 60);
    assert_eq!(scheduler.stats().frames_dropped, 0);

    // 59 gaps between 60 frames
    let expected = config.frame_interval() * 59;
    assert!(paced.abs_diff(expected) < Duration::from_millis(1), "paced {paced:?}");
}

#[test]
fn test_drained_buffer_waits_then_resumes() {
    let config = PlaybackConfig::default();
    let start = std::time::Instant::now();
    let mut clock = PlaybackClock::new(config.clone(), start);
    let mut scheduler = FrameScheduler::new(&config, clock.decisions());

    clock.poll(&buffered(config.target_buffer_sec, start), start);
    scheduler.sync_decision();

    // Drift -0.25s: buffer fully drained
    let drained_at = start + Duration::from_millis(500);
    let outcome = clock.poll(&buffered(0.0, drained_at), drained_at);
    assert_eq!(outcome.state, PlaybackState::Waiting);
    assert_eq!(scheduler.sync_decision(), Some(ClockDecision::Wait));
    assert!(matches!(
        scheduler.schedule(video_frame(0, true)),
        PresentationInstruction::Hold { .. }
    ));
    assert!(scheduler.pop_next().is_none());

    // Refilled to target 300ms later, before max_seek_wait
    let refilled_at = drained_at + Duration::from_millis(300);
    let outcome = clock.poll(&buffered(config.target_buffer_sec, refilled_at), refilled_at);
    assert_eq!(outcome.previous, PlaybackState::Waiting);
    assert_eq!(outcome.state, PlaybackState::Playing);
    assert_eq!(scheduler.sync_decision(), Some(ClockDecision::Continue));
    assert_eq!(scheduler.pop_next().map(|s| s.frame.sequence), Some(0));
}

#[test]
fn test_unknown_packet_type_is_skipped() {
    let (sink, mut frames) = frame_channel();
    let mut media = MediaPipeline::new(create_decoder(Default::default(), sink).unwrap(), 60);
    let mut router = StreamRouter::default();

    let mut stream = one_second_of_video(2);
    stream.insert(
        2,
        Packet {
            tag: 0x99,
            timestamp_us: Some(0),
            payload: Bytes::from_static(&[0xDE, 0xAD]),
        },
    );

    let mut unknown = 0;
    for packet in stream {
        match router.route(packet) {
            Ok(events) => {
                for event in events {
                    media.handle(event).unwrap();
                }
            }
            Err(_) => unknown += 1,
        }
    }

    assert_eq!(unknown, 1);
    assert_eq!(frames.try_recv().unwrap().presentation_time_us, 0);
    assert_eq!(frames.try_recv().unwrap().presentation_time_us, FRAME_US);
}

#[test]
fn test_audio_before_config_yields_no_frame() {
    let (sink, mut frames) = frame_channel();
    let mut media = MediaPipeline::new(create_decoder(Default::default(), sink).unwrap(), 60);
    let mut router = StreamRouter::default();

    let early = Packet::new(PacketType::AudioFrameAac, Some(0), vec![0x21, 0x10]);
    let mut events = router.route(early).unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        media.handle(events.remove(0)),
        Err(DecoderError::DescriptorMissing(MediaType::Audio))
    ));
    assert!(frames.try_recv().is_err());
    assert_eq!(media.stats().descriptor_missing, 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_plays_out_stream_at_frame_rate() {
    let reader = Cursor::new(wire(&one_second_of_video(60)));
    let (session, events) = MirrorSession::start(reader, relaxed_config()).unwrap();

    let events = collect(events).await;
    let presented = frames(&events);

    assert_eq!(presented.len(), 60);
    assert!(presented[0].1.is_keyframe);
    for (index, (_, frame)) in presented.iter().enumerate() {
        assert_eq!(frame.presentation_time_us, index as u64 * FRAME_US);
    }
    let span = presented[59].0 - presented[0].0;
    assert!(
        span >= Duration::from_millis(950) && span <= Duration::from_millis(1050),
        "60 frames spanned {span:?}"
    );
    assert!(matches!(events.last(), Some((_, SessionEvent::StreamEnded))));

    let stats = session.stats();
    assert_eq!(stats.demux.packets_framed, 61);
    assert_eq!(stats.scheduler.frames_presented, 60);
    assert_eq!(stats.decoder.frames_emitted, 60);
    assert!(!session.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_session_skips_unknown_packet_type() {
    let mut packets = one_second_of_video(10);
    packets.insert(
        4,
        Packet {
            tag: 0x99,
            timestamp_us: Some(0),
            payload: Bytes::from_static(&[1, 2, 3]),
        },
    );
    let (session, events) =
        MirrorSession::start(Cursor::new(wire(&packets)), relaxed_config()).unwrap();

    let events = collect(events).await;
    assert_eq!(frames(&events).len(), 10);
    assert!(!events.iter().any(|(_, e)| matches!(e, SessionEvent::DecoderError(_))));
    assert_eq!(session.stats().demux.unknown_packet_types, 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_reports_audio_before_config() {
    let packets = [
        Packet::new(PacketType::AudioFrameAac, Some(0), vec![0x21, 0x10]),
        audio_config(),
        Packet::new(PacketType::AudioFrameAac, Some(23_219), vec![0x21, 0x11]),
    ];
    let (session, events) =
        MirrorSession::start(Cursor::new(wire(&packets)), relaxed_config()).unwrap();

    let events = collect(events).await;
    let errors: Vec<_> = events
        .iter()
        .filter_map(|(_, e)| match e {
            SessionEvent::DecoderError(message) => Some(message.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("codec descriptor"), "{}", errors[0]);

    let presented = frames(&events);
    assert_eq!(presented.len(), 1);
    assert_eq!(presented[0].1.media_type, MediaType::Audio);
    assert_eq!(presented[0].1.presentation_time_us, 23_219);
    assert_eq!(session.stats().pipeline.descriptor_missing, 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_reports_truncated_tail() {
    let mut bytes = wire(&one_second_of_video(3));
    bytes.extend_from_slice(&[0x11, 0x00, 0x00]);
    let (_session, events) = MirrorSession::start(Cursor::new(bytes), relaxed_config()).unwrap();

    let events = collect(events).await;
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        SessionEvent::StreamTruncated { buffered_bytes: 3 }
    )));
    assert_eq!(frames(&events).len(), 3);
    assert!(matches!(events.last(), Some((_, SessionEvent::StreamEnded))));
}

#[tokio::test(start_paused = true)]
async fn test_stop_releases_held_frames() {
    let (mut device, reader) = tokio::io::duplex(64 * 1024);
    let (session, mut events) = MirrorSession::start(reader, relaxed_config()).unwrap();

    device.write_all(&wire(&one_second_of_video(30))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.is_running());

    session.stop().await;
    assert!(!session.is_running());

    let mut presented = Vec::new();
    while let Some(event) = events.recv().await {
        if let SessionEvent::Frame(frame) = event {
            presented.push(frame);
        }
    }
    let count = presented.len() as u64;
    for frame in presented {
        session.release(frame);
    }

    let stats = session.stats();
    assert_eq!(stats.decoder.frames_emitted, 30);
    // Everything the receiver did not get was handed back on teardown
    assert_eq!(stats.decoder.frames_outstanding, count);
}

#[tokio::test(start_paused = true)]
async fn test_released_frames_return_to_decoder() {
    let (mut device, reader) = tokio::io::duplex(64 * 1024);
    let (session, mut events) = MirrorSession::start(reader, relaxed_config()).unwrap();

    device.write_all(&wire(&one_second_of_video(5))).await.unwrap();

    let mut presented = 0;
    while presented < 5 {
        match events.recv().await {
            Some(SessionEvent::Frame(frame)) => {
                session.release(frame);
                presented += 1;
            }
            Some(_) => {}
            None => panic!("session ended early"),
        }
    }
    // Let the pipeline pick up the returned frames while the stream is open
    tokio::time::sleep(Duration::from_millis(10)).await;
    session.stop().await;

    let stats = session.stats();
    assert_eq!(stats.decoder.frames_emitted, 5);
    assert_eq!(stats.decoder.frames_released, 5);
    assert_eq!(stats.decoder.frames_outstanding, 0);
}

#[tokio::test(start_paused = true)]
async fn test_live_source_keeps_playing_under_default_config() {
    let (device, reader) = tokio::io::duplex(64 * 1024);
    let (session, events) = MirrorSession::start(reader, SessionConfig::default()).unwrap();
    let source = spawn_live_source(device, 300, None);

    let events = collect(events).await;
    source.await.unwrap();

    let presented = frames(&events);
    assert_eq!(presented.len(), 300);
    for (index, (_, frame)) in presented.iter().enumerate() {
        assert_eq!(frame.presentation_time_us, index as u64 * FRAME_US);
    }
    // Steady 60 fps once the initial buffer is built
    for pair in presented[20..].windows(2) {
        let gap = pair[1].0 - pair[0].0;
        assert!(
            gap >= Duration::from_millis(15) && gap <= Duration::from_millis(18),
            "gap of {gap:?}"
        );
    }

    let states: Vec<_> = state_changes(&events).into_iter().map(|(_, s)| s).collect();
    assert_eq!(states, vec![PlaybackState::Playing]);

    let stats = session.stats();
    assert_eq!(stats.scheduler.frames_dropped, 0);
    assert_eq!(stats.scheduler.seeks_to_live, 0);
    assert_eq!(stats.recovery_timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_source_waits_then_resumes_playing() {
    let (device, reader) = tokio::io::duplex(64 * 1024);
    let (session, events) = MirrorSession::start(reader, SessionConfig::default()).unwrap();
    let stall = Duration::from_millis(1000)..Duration::from_millis(1700);
    let source = spawn_live_source(device, 180, Some(stall));

    let events = collect(events).await;
    source.await.unwrap();

    let changes = state_changes(&events);
    let states: Vec<_> = changes.iter().map(|(_, s)| *s).collect();
    assert_eq!(
        states,
        vec![PlaybackState::Playing, PlaybackState::Waiting, PlaybackState::Playing]
    );
    let waited = changes[2].0 - changes[1].0;
    assert!(waited < Duration::from_millis(1000), "waited {waited:?}");

    let stats = session.stats();
    assert_eq!(stats.recovery_timeouts, 0);
    assert_eq!(stats.scheduler.frames_dropped, 0);
    // 42 frames fell inside the stall
    assert_eq!(frames(&events).len(), 180 - 42);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_times_out_after_max_time_to_recover() {
    let (mut device, reader) = tokio::io::duplex(64 * 1024);
    let (session, mut events) = MirrorSession::start(reader, SessionConfig::default()).unwrap();

    // A short burst, then the device goes quiet without disconnecting
    device.write_all(&wire(&one_second_of_video(6))).await.unwrap();

    let mut changes = Vec::new();
    let (timed_out_at, report) = loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("no recovery timeout within 10s")
            .expect("session ended early");
        match event {
            SessionEvent::StateChanged(state) => changes.push((Instant::now(), state)),
            SessionEvent::RecoveryTimeout(report) => break (Instant::now(), report),
            _ => {}
        }
    };

    let (recovering_at, _) = *changes
        .iter()
        .rev()
        .find(|(_, s)| *s == PlaybackState::Recovering)
        .expect("never entered RECOVERING");
    let (waiting_at, _) = *changes
        .iter()
        .rev()
        .find(|(_, s)| *s == PlaybackState::Waiting)
        .expect("never entered WAITING");

    assert_eq!(recovering_at - waiting_at, Duration::from_millis(1000));
    assert_eq!(timed_out_at - recovering_at, Duration::from_millis(200));
    assert_eq!(report.recovering_for, Duration::from_millis(200));
    assert_eq!(session.stats().recovery_timeouts, 1);

    session.stop().await;
    drop(device);
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_does_not_escalate() {
    let (mut device, reader) = tokio::io::duplex(64 * 1024);
    let (session, mut events) = MirrorSession::start(reader, SessionConfig::default()).unwrap();

    // Configured, but no media ever arrives
    device.write_all(&wire(&[video_config()])).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(session.state(), PlaybackState::Starting);
    assert!(events.try_recv().is_err());
    let stats = session.stats();
    assert_eq!(stats.recovery_timeouts, 0);
    assert_eq!(stats.pipeline.flushes, 0);

    session.stop().await;
    drop(device);
}
