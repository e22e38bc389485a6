//! Playback session tests against the recording backend

use crate::test_utils::{
    frame_index, indexed_wav, raw_wav, silent_wav, wait_until, write_fixture, Event, FailStep, FakeBackend,
    FakeConfig,
};
use pcm_player::audio::{
    CancellationToken, DeviceOp, PlaybackError, PlaybackLoopExitReason, PlaybackPhase, PlaybackSession,
    SampleFormat,
};
use pcm_player::config::Settings;
use std::io::Cursor;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

type Session = PlaybackSession<FakeBackend>;
type PlayResult = Result<PlaybackLoopExitReason, PlaybackError>;

fn session(backend: &FakeBackend) -> Arc<Session> {
    Arc::new(PlaybackSession::new(backend.clone(), Settings::default()))
}

/// Starts playing `bytes` on a background thread.
fn spawn_play(session: &Arc<Session>, bytes: Vec<u8>, cancel: &CancellationToken) -> JoinHandle<PlayResult> {
    let session = Arc::clone(session);
    let cancel = cancel.clone();
    thread::spawn(move || session.play_with_cancel(Cursor::new(bytes), &cancel))
}

/// Frame index of the first write after the most recent prepare.
fn first_frame_after_last_prepare(backend: &FakeBackend) -> Option<u16> {
    let events = backend.events();
    let prepared_at = events.iter().rposition(|e| *e == Event::Prepare)?;
    events[prepared_at..].iter().find_map(|e| match e {
        Event::Write { first_frame, .. } => Some(frame_index(first_frame)),
        _ => None,
    })
}

/// First frame index and frame count of every write after the most recent
/// prepare.
fn writes_after_last_prepare(backend: &FakeBackend) -> Vec<(u16, usize)> {
    let events = backend.events();
    let start = events.iter().rposition(|e| *e == Event::Prepare).unwrap_or(0);
    events[start..]
        .iter()
        .filter_map(|e| match e {
            Event::Write { frames, first_frame } => Some((frame_index(first_frame), *frames)),
            _ => None,
        })
        .collect()
}

/// Asserts that the writes after the last prepare start at `first` and
/// neither repeat nor skip a frame.
fn assert_contiguous_from(backend: &FakeBackend, first: u16) {
    let writes = writes_after_last_prepare(backend);
    assert_eq!(writes.first().map(|w| w.0), Some(first), "{:?}", writes);
    for pair in writes.windows(2) {
        assert_eq!(usize::from(pair[1].0), usize::from(pair[0].0) + pair[0].1, "{:?}", writes);
    }
}

/// Pauses and waits until the writer has dropped the device buffer.
fn pause_and_settle(session: &Session, backend: &FakeBackend) {
    session.pause().unwrap();
    assert!(wait_until(WAIT, || backend.count(&Event::Drop) >= 1));
    assert!(wait_until(WAIT, || session.phase().unwrap() == PlaybackPhase::Paused));
}

#[test]
fn test_two_second_stream_plays_in_real_time() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);

    let reason = session.play(Cursor::new(silent_wav(44100, 2, 16, 88200))).unwrap();

    assert_eq!(reason, PlaybackLoopExitReason::EndOfStream);
    let elapsed = session.elapsed_ms().unwrap();
    assert!((1900..=2600).contains(&elapsed), "elapsed {} ms", elapsed);
    assert_eq!(backend.total_frames_written(), 88200);

    let events = backend.events();
    assert_eq!(
        &events[..6],
        &[
            Event::Open("default".to_string()),
            Event::Access,
            Event::Format(SampleFormat::S16Le),
            Event::Channels(2),
            Event::Rate(44100),
            Event::Commit,
        ]
    );
    assert_eq!(&events[events.len() - 2..], &[Event::Drain, Event::Close]);

    session.set_playback_volume(50).unwrap();
    assert_eq!(session.playback_volume().unwrap(), 50);
    assert_eq!(backend.volumes(), [50, 50]);
}

#[test]
fn test_unsupported_sample_width_fails_before_open() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    let result = session.play(Cursor::new(raw_wav(8000, 1, 4, &[0u8; 16])));
    assert!(matches!(result, Err(PlaybackError::Format(_))), "{:?}", result);

    let result = session.play(Cursor::new(silent_wav(8000, 1, 32, 16)));
    assert!(matches!(result, Err(PlaybackError::Format(_))), "{:?}", result);

    assert!(backend.events().is_empty());
    assert!(!session.is_active());
}

#[test]
fn test_truncated_header_is_format_error() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    let wav = silent_wav(8000, 1, 16, 16);
    let result = session.play(Cursor::new(wav[..30].to_vec()));
    assert!(matches!(result, Err(PlaybackError::Format(_))), "{:?}", result);
    assert!(backend.events().is_empty());
}

#[test]
fn test_eight_and_twenty_four_bit_streams() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    session.play(Cursor::new(silent_wav(8000, 1, 8, 800))).unwrap();
    assert!(backend.events().contains(&Event::Format(SampleFormat::U8)));
    assert_eq!(backend.total_frames_written(), 800);

    session.play(Cursor::new(silent_wav(48000, 2, 24, 800))).unwrap();
    assert!(backend.events().contains(&Event::Format(SampleFormat::S24Le3)));
    assert!(backend.events().contains(&Event::Rate(48000)));
    assert_eq!(backend.total_frames_written(), 1600);
    assert_eq!(backend.count(&Event::Close), 2);
}

#[test]
fn test_negotiation_failure_names_step_and_closes_device() {
    let backend = FakeBackend::new(FakeConfig {
        fail_step: Some(FailStep::Channels),
        ..FakeConfig::default()
    });
    let session = session(&backend);

    let err = session.play(Cursor::new(silent_wav(8000, 2, 16, 100))).unwrap_err();
    match err {
        PlaybackError::Device(e) => {
            assert_eq!(e.op, DeviceOp::SetChannels);
            assert_eq!(e.code, -22);
            assert!(e.to_string().starts_with("Can not set channel count. Error -22."));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(backend.count(&Event::Close), 1);
    assert_eq!(backend.writes(), 0);
    assert!(!session.is_active());
}

#[test]
fn test_open_failure_is_device_error() {
    let backend = FakeBackend::new(FakeConfig {
        fail_step: Some(FailStep::Open),
        ..FakeConfig::default()
    });
    let session = session(&backend);

    let err = session.play(Cursor::new(silent_wav(8000, 2, 16, 100))).unwrap_err();
    assert!(matches!(err, PlaybackError::Device(ref e) if e.op == DeviceOp::OpenPlayback));
    assert!(backend.events().is_empty());
}

#[test]
fn test_device_rate_mismatch_still_plays() {
    let backend = FakeBackend::new(FakeConfig {
        forced_rate: Some(44100),
        ..FakeConfig::default()
    });
    let session = session(&backend);

    let reason = session.play(Cursor::new(silent_wav(48000, 2, 16, 480))).unwrap();
    assert_eq!(reason, PlaybackLoopExitReason::EndOfStream);
    assert!(backend.events().contains(&Event::Rate(44100)));
}

#[test]
fn test_pause_is_idempotent_and_cancel_while_paused() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 3));
    session.pause().unwrap();
    session.pause().unwrap();
    pause_and_settle(&session, &backend);

    let writes = backend.writes();
    let elapsed = session.elapsed_ms().unwrap();
    thread::sleep(Duration::from_millis(250));
    assert_eq!(backend.count(&Event::Drop), 1);
    assert_eq!(backend.writes(), writes);
    assert_eq!(session.elapsed_ms().unwrap(), elapsed);

    cancel.cancel();
    assert_eq!(player.join().unwrap().unwrap(), PlaybackLoopExitReason::Cancelled);
    assert_eq!(backend.count(&Event::Close), 1);
}

#[test]
fn test_resume_continues_from_elapsed_position() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 5));
    pause_and_settle(&session, &backend);
    let elapsed = session.elapsed_ms().unwrap();
    assert!(elapsed > 0);

    session.resume().unwrap();
    assert!(wait_until(WAIT, || first_frame_after_last_prepare(&backend).is_some()));
    // 8000 Hz mono, 8 frames per millisecond
    assert_eq!(first_frame_after_last_prepare(&backend), Some((elapsed * 8) as u16));
    assert_eq!(session.phase().unwrap(), PlaybackPhase::Playing);

    cancel.cancel();
    assert_eq!(player.join().unwrap().unwrap(), PlaybackLoopExitReason::Cancelled);
}

#[test]
fn test_seek_while_paused_moves_without_writing() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 3));
    pause_and_settle(&session, &backend);
    let paused_at = session.elapsed_ms().unwrap();
    let writes = backend.writes();

    session.seek(500).unwrap();
    assert_eq!(session.elapsed_ms().unwrap(), paused_at + 500);
    assert_eq!(session.phase().unwrap(), PlaybackPhase::Paused);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(backend.writes(), writes);
    assert_eq!(backend.count(&Event::Prepare), 0);

    session.resume().unwrap();
    assert!(wait_until(WAIT, || first_frame_after_last_prepare(&backend).is_some()));
    assert_eq!(first_frame_after_last_prepare(&backend), Some(((paused_at + 500) * 8) as u16));

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_seek_before_start_clamps_to_zero() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 3));
    pause_and_settle(&session, &backend);
    session.seek(-60_000).unwrap();
    assert_eq!(session.elapsed_ms().unwrap(), 0);

    session.resume().unwrap();
    assert!(wait_until(WAIT, || first_frame_after_last_prepare(&backend).is_some()));
    assert_eq!(first_frame_after_last_prepare(&backend), Some(0));

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_play_from_restarts_at_position() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 2));
    session.play_from(1000).unwrap();
    assert!(session.elapsed_ms().unwrap() >= 1000);
    assert!(wait_until(WAIT, || first_frame_after_last_prepare(&backend).is_some()));
    assert_eq!(first_frame_after_last_prepare(&backend), Some(8000));
    assert!(backend.count(&Event::Drop) >= 1);

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_seek_while_playing_restarts_at_offset() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 2));
    session.seek(1000).unwrap();
    let target = session.elapsed_ms().unwrap();
    assert!(target >= 1000);
    assert!(wait_until(WAIT, || first_frame_after_last_prepare(&backend).is_some()));
    let frame = u64::from(first_frame_after_last_prepare(&backend).unwrap());
    // The clock kept running between the seek and the read above.
    assert!(frame <= target * 8 && frame >= 8000);

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_pause_then_resume_without_wait_keeps_position() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 4));
    session.pause().unwrap();
    let elapsed = session.elapsed_ms().unwrap();
    session.resume().unwrap();
    assert_eq!(session.phase().unwrap(), PlaybackPhase::Playing);

    assert!(wait_until(WAIT, || writes_after_last_prepare(&backend).len() >= 3));
    assert_contiguous_from(&backend, (elapsed * 8) as u16);

    cancel.cancel();
    assert_eq!(player.join().unwrap().unwrap(), PlaybackLoopExitReason::Cancelled);
}

#[test]
fn test_seek_before_pause_settles() {
    // 250 ms per write keeps the pause pending while the seek lands
    let backend = FakeBackend::new(FakeConfig {
        realtime: true,
        period_frames: 2000,
        ..FakeConfig::default()
    });
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 2 && backend.writes() > backend.writes_completed()));
    session.pause().unwrap();
    assert_eq!(session.phase().unwrap(), PlaybackPhase::JustPaused);
    let paused_at = session.elapsed_ms().unwrap();
    session.seek(300).unwrap();
    assert_eq!(session.elapsed_ms().unwrap(), paused_at + 300);

    assert!(wait_until(WAIT, || session.phase().unwrap() == PlaybackPhase::Paused));
    let writes = backend.writes();
    thread::sleep(Duration::from_millis(150));
    assert_eq!(backend.writes(), writes);
    assert_eq!(backend.count(&Event::Drop), 1);

    session.resume().unwrap();
    assert!(wait_until(WAIT, || writes_after_last_prepare(&backend).len() >= 2));
    assert_contiguous_from(&backend, ((paused_at + 300) * 8) as u16);

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_play_from_while_device_opens_is_kept() {
    let backend = FakeBackend::new(FakeConfig {
        realtime: true,
        open_delay: Some(Duration::from_millis(300)),
        ..FakeConfig::default()
    });
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || session.is_active()));
    session.play_from(1000).unwrap();

    assert!(wait_until(WAIT, || backend.writes_completed() >= 1));
    assert_eq!(frame_index(&backend.written_first_frames()[0]), 8000);
    assert!(session.elapsed_ms().unwrap() >= 1000);

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_pause_while_device_opens_is_kept() {
    let backend = FakeBackend::new(FakeConfig {
        realtime: true,
        open_delay: Some(Duration::from_millis(300)),
        ..FakeConfig::default()
    });
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || session.is_active()));
    session.pause().unwrap();

    assert!(wait_until(WAIT, || session.phase().unwrap() == PlaybackPhase::Paused));
    let paused_at = session.elapsed_ms().unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(backend.writes(), 0);
    assert_eq!(session.elapsed_ms().unwrap(), paused_at);

    session.resume().unwrap();
    assert!(wait_until(WAIT, || backend.writes_completed() >= 1));
    assert_contiguous_from(&backend, (paused_at * 8) as u16);

    cancel.cancel();
    player.join().unwrap().unwrap();
}

#[test]
fn test_pause_without_stream_is_ignored() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    session.pause().unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(session.phase().unwrap(), PlaybackPhase::Playing);

    session.play(Cursor::new(silent_wav(8000, 1, 16, 100))).unwrap();
    session.pause().unwrap();
    assert_eq!(session.phase().unwrap(), PlaybackPhase::Playing);
    assert_eq!(backend.count(&Event::Drop), 0);
}

#[test]
fn test_dispose_during_write() {
    let backend = FakeBackend::new(FakeConfig {
        realtime: true,
        period_frames: 4000,
        ..FakeConfig::default()
    });
    let session = session(&backend);
    let player = spawn_play(&session, indexed_wav(8000, 24000), &CancellationToken::new());

    assert!(wait_until(WAIT, || backend.writes() >= 1));
    session.dispose();

    assert_eq!(player.join().unwrap().unwrap(), PlaybackLoopExitReason::Disposed);
    assert_eq!(backend.count(&Event::Drain), 1);
    assert_eq!(backend.count(&Event::Close), 1);
    assert!(session.is_disposed());

    session.dispose();
    assert_eq!(backend.count(&Event::Close), 1);

    assert!(matches!(session.pause(), Err(PlaybackError::Disposed)));
    assert!(matches!(session.resume(), Err(PlaybackError::Disposed)));
    assert!(matches!(session.seek(10), Err(PlaybackError::Disposed)));
    assert!(matches!(session.elapsed_ms(), Err(PlaybackError::Disposed)));
    assert!(matches!(session.set_playback_volume(10), Err(PlaybackError::Disposed)));
    assert!(matches!(session.playback_mute(), Err(PlaybackError::Disposed)));
    assert!(matches!(
        session.play(Cursor::new(silent_wav(8000, 1, 16, 10))),
        Err(PlaybackError::Disposed)
    ));
    assert_eq!(backend.count(&Event::Open("default".to_string())), 1);
}

#[test]
fn test_write_failure_still_closes_device() {
    let backend = FakeBackend::new(FakeConfig {
        fail_write_at: Some(3),
        ..FakeConfig::default()
    });
    let session = session(&backend);

    let err = session.play(Cursor::new(silent_wav(8000, 2, 16, 8000))).unwrap_err();
    match err {
        PlaybackError::Device(e) => {
            assert_eq!(e.op, DeviceOp::Write);
            assert_eq!(e.code, -32);
        }
        other => panic!("unexpected error {:?}", other),
    }
    let events = backend.events();
    assert_eq!(&events[events.len() - 2..], &[Event::Drain, Event::Close]);
    assert!(!session.is_active());
}

#[test]
fn test_second_play_while_playing_is_rejected() {
    let backend = FakeBackend::realtime();
    let session = session(&backend);
    let cancel = CancellationToken::new();
    let player = spawn_play(&session, indexed_wav(8000, 24000), &cancel);

    assert!(wait_until(WAIT, || backend.writes() >= 1));
    let result = session.play(Cursor::new(silent_wav(8000, 1, 16, 10)));
    assert!(matches!(result, Err(PlaybackError::InvalidState(_))), "{:?}", result);

    cancel.cancel();
    assert_eq!(player.join().unwrap().unwrap(), PlaybackLoopExitReason::Cancelled);
    assert_eq!(backend.count(&Event::Open("default".to_string())), 1);
}

#[test]
fn test_transport_without_stream_is_invalid_state() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    assert!(matches!(session.play_from(100), Err(PlaybackError::InvalidState(_))));
    assert!(matches!(session.seek(100), Err(PlaybackError::InvalidState(_))));
    assert!(matches!(session.resume(), Err(PlaybackError::InvalidState(_))));
    assert!(backend.events().is_empty());
}

#[test]
fn test_mute_round_trip() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    assert!(!session.playback_mute().unwrap());
    session.set_playback_mute(true).unwrap();
    assert!(session.playback_mute().unwrap());
    session.set_playback_mute(false).unwrap();
    assert!(!session.playback_mute().unwrap());

    assert_eq!(backend.count(&Event::MixerOpen("default".to_string())), 5);
    assert_eq!(backend.count(&Event::MixerClose), 5);
}

#[test]
fn test_volume_reads_channel_average() {
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    backend.set_volumes([30, 71]);
    assert_eq!(session.playback_volume().unwrap(), 50);
}

#[test]
fn test_play_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let path = write_fixture(dir.path(), "tone.wav", &silent_wav(8000, 2, 16, 400));
    let backend = FakeBackend::new(FakeConfig::default());
    let session = session(&backend);

    assert_eq!(session.play_file(&path)?, PlaybackLoopExitReason::EndOfStream);
    assert_eq!(backend.total_frames_written(), 400);

    let missing = session.play_file(dir.path().join("missing.wav"));
    assert!(matches!(missing, Err(PlaybackError::Io(_))));
    Ok(())
}

#[test]
#[ignore] // Requires a real ALSA playback device
fn test_alsa_default_device() {
    let session = PlaybackSession::alsa(Settings::default());
    let reason = session.play(Cursor::new(silent_wav(44100, 2, 16, 22050))).unwrap();
    assert_eq!(reason, PlaybackLoopExitReason::EndOfStream);
    session.dispose();
}
