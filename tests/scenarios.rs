//! End-to-end session scenarios against the scripted engine.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use playctl::core::runtime;
use playctl::engine::{EngineEvent, EngineState, MediaEngine, SurfaceHandle, TrackDescriptor};
use playctl::sim::{SimEngine, SimLibrary, SimMedia, SimTransport, SnapshotBehavior};
use playctl::{
    EventBus, Paused, PlayerError, RuntimeOptions, Session, SessionOptions, StreamType, TimeChanged,
    VideoInfoChanged,
};

struct Harness {
    session: Session,
    engine: Arc<SimEngine>,
    library: Arc<SimLibrary>,
}

fn harness_with(profile: SimMedia, transport: SimTransport) -> Harness {
    runtime::init(RuntimeOptions::default());
    let library = SimLibrary::new(profile);
    let session = Session::new(
        library.clone(),
        SurfaceHandle(7),
        Box::new(transport.with_release_log(library.release_log())),
        SessionOptions {
            buffering_timeout: Duration::from_secs(2),
            snapshot_timeout: Duration::from_millis(200),
            boundary_workers: 1,
        },
    )
    .unwrap();
    let engine = library.engine().unwrap();
    Harness { session, engine, library }
}

fn harness(profile: SimMedia) -> Harness {
    harness_with(profile, SimTransport::new())
}

fn record<E: Clone + Send + Sync + 'static>(bus: &EventBus) -> Arc<Mutex<Vec<E>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    bus.subscribe::<E, _>(move |e: &E| s.lock().unwrap().push(e.clone()));
    seen
}

fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}

#[test]
fn seek_is_clamped_into_range() {
    let mut h = harness(SimMedia::video(1920, 1080));
    h.session.load_media(StreamType::File, "clip.mp4", 0.25, 0.75).unwrap();

    h.session.seek(0.9).unwrap();
    h.session.seek(0.1).unwrap();
    h.session.seek(0.5).unwrap();

    let applied = h.engine.applied_positions();
    // Initial seek to start, then the three explicit seeks
    assert_eq!(applied, vec![0.25, 0.75, 0.25, 0.5]);
    assert!(applied.iter().all(|p| (0.25..=0.75).contains(p)));
}

#[test]
fn load_reports_start_time() {
    let mut h = harness(SimMedia::video(1920, 1080));
    let times = record::<TimeChanged>(h.session.events());

    h.session.load_media(StreamType::File, "clip.mp4", 0.25, 0.75).unwrap();
    h.engine.flush();

    let times = times.lock().unwrap();
    assert!(times.contains(&TimeChanged(2_500)));
    assert_eq!(h.session.state().current_time_ms(), 2_500.0);
    assert_eq!(h.session.engine_state(), EngineState::Paused);
}

#[test]
fn boundary_pauses_and_stays_paused() {
    let mut h = harness(SimMedia::video(640, 360));
    let paused = record::<Paused>(h.session.events());
    h.session.load_media(StreamType::File, "clip.mp4", 0.0, 0.5).unwrap();
    h.engine.flush();
    let pauses_before = h.engine.pause_calls();
    let paused_before = paused.lock().unwrap().len();

    h.session.play().unwrap();
    h.engine.emit(EngineEvent::TimeChanged(4_000));
    h.engine.emit(EngineEvent::PositionChanged(0.5));
    h.engine.emit(EngineEvent::PositionChanged(0.55));
    h.engine.emit(EngineEvent::TimeChanged(5_600));

    assert!(wait_for(Duration::from_secs(2), || h.engine.state() == EngineState::Paused));
    h.engine.flush();
    assert!(wait_for(Duration::from_secs(2), || paused.lock().unwrap().len() > paused_before));

    // One boundary hit, one pause
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.engine.pause_calls(), pauses_before + 1);
    assert_eq!(h.session.engine_state(), EngineState::Paused);
}

#[test]
fn stale_boundary_pause_is_dropped_after_reload() {
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 0.5).unwrap();
    h.session.play().unwrap();
    h.engine.emit(EngineEvent::PositionChanged(0.6));
    h.engine.flush();

    // Whether or not that pause already ran, the new load ends paused at its start
    h.session.load_media(StreamType::File, "b.mp4", 0.2, 1.0).unwrap();
    h.engine.flush();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(h.session.engine_state(), EngineState::Paused);
    assert!((h.session.state().current_time_ms() - 2_000.0).abs() < 1.0);
}

#[test]
fn geometry_once_per_load_with_video() {
    let mut h = harness(SimMedia::video(720, 576).with_sar(16, 15));
    let infos = record::<VideoInfoChanged>(h.session.events());

    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
    h.session.seek(0.4).unwrap();
    h.session.step_forward().unwrap();
    h.engine.flush();
    assert_eq!(infos.lock().unwrap().len(), 1);

    h.session.load_media(StreamType::File, "b.mp4", 0.0, 1.0).unwrap();
    h.engine.flush();
    let infos = infos.lock().unwrap();
    assert_eq!(infos.len(), 2);
    let expected = 720.0 / 576.0 * 16.0 / 15.0;
    assert!((infos[1].aspect_ratio - expected).abs() < 1e-4);
}

#[test]
fn geometry_never_for_audio_only() {
    let mut h = harness(SimMedia::audio_only());
    let infos = record::<VideoInfoChanged>(h.session.events());

    h.session.load_media(StreamType::File, "a.flac", 0.0, 1.0).unwrap();
    h.session.play().unwrap();
    h.session.seek(0.5).unwrap();
    h.engine.flush();
    assert!(infos.lock().unwrap().is_empty());
}

#[test]
fn step_forward_then_back_returns_within_one_frame() {
    let mut h = harness(SimMedia::video(640, 360).with_fps(25.0));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
    h.session.seek(0.5).unwrap();
    h.engine.flush();
    let base = h.session.state().current_time_ms();

    h.session.step_forward().unwrap();
    h.engine.flush();
    assert!((h.session.state().current_time_ms() - (base + 40.0)).abs() <= 1.0);

    h.session.step_back().unwrap();
    h.engine.flush();
    assert!((h.session.state().current_time_ms() - base).abs() <= 40.0);
    assert_eq!(h.session.engine_state(), EngineState::Paused);
}

#[test]
fn step_forward_near_stop_never_passes_it() {
    let mut h = harness(SimMedia::video(640, 360).with_fps(25.0));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 0.5).unwrap();
    h.session.seek(0.499).unwrap();
    h.engine.flush();

    // 10 ms left before stop, one frame is 40 ms
    h.session.step_forward().unwrap();
    h.engine.flush();
    let stop_ms = 5_000.0;
    assert!(h.engine.time_ms() <= 5_000);
    assert!(h.session.state().current_time_ms() <= stop_ms);
    assert!((h.session.state().current_time_ms() - stop_ms).abs() < 1.0);

    // Already at stop: nothing moves
    h.session.step_forward().unwrap();
    h.engine.flush();
    assert!(h.engine.time_ms() <= 5_000);
}

#[test]
fn step_back_stops_at_range_start() {
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.3, 0.6).unwrap();
    h.engine.flush();

    h.session.step_back().unwrap();
    h.engine.flush();
    assert!((h.session.state().current_time_ms() - 3_000.0).abs() < 1.0);
    assert_eq!(h.engine.applied_positions().last(), Some(&0.3));
}

#[test]
fn snapshot_written_with_callback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();

    assert!(h.session.capture_snapshot(0, 640, 360, &path));
    assert!(path.exists());
}

#[test]
fn snapshot_falls_back_to_fresh_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    let mut h = harness(SimMedia::video(640, 360).with_snapshot(SnapshotBehavior::FileOnly));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();

    assert!(h.session.capture_snapshot(0, 640, 360, &path));
}

#[test]
fn snapshot_rejects_stale_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frame.png");
    std::fs::write(&path, b"from an earlier capture").unwrap();
    let mut h = harness(SimMedia::video(640, 360).with_snapshot(SnapshotBehavior::Drop));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();

    assert!(!h.session.capture_snapshot(0, 640, 360, &path));
    assert_eq!(h.engine.subscription_count(), 10);
}

#[test]
fn snapshot_without_video_track_skips_engine() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
    h.session.set_video_track(-1).unwrap();

    assert!(!h.session.capture_snapshot(0, 640, 360, dir.path().join("x.png")));
    assert_eq!(h.engine.snapshot_calls(), 0);
}

#[test]
fn two_audio_tracks_listed_with_unique_ids() {
    let profile = SimMedia::video(640, 360).with_audio_tracks(vec![
        TrackDescriptor { id: 1, name: "English".into() },
        TrackDescriptor { id: 2, name: "Commentary".into() },
    ]);
    let mut h = harness(profile);
    h.session.load_media(StreamType::File, "a.mkv", 0.0, 1.0).unwrap();

    let tracks = h.session.audio_tracks();
    assert_eq!(tracks.len(), 2);
    assert_ne!(tracks[0].id, tracks[1].id);
    assert_eq!(tracks[1].name, "Commentary");

    h.session.set_audio_track(2).unwrap();
    assert!(h.session.set_audio_track(9).is_err());
    assert_eq!(h.session.video_tracks().len(), 1);
}

#[test]
fn stream_source_loads_through_transport() {
    let transport = SimTransport::new().with_file("case/42", vec![7u8; 64]);
    let mut h = harness_with(SimMedia::video(640, 360), transport);

    h.session.connect_local_stream("pipe-1").unwrap();
    h.session
        .load_media(StreamType::LocalFileStream, "case/42", 0.0, 1.0)
        .unwrap();
    assert!(h.session.has_active_stream());

    // Reload from a plain file disposes the stream
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
    assert!(!h.session.has_active_stream());
    h.session.disconnect_local_stream().unwrap();
}

#[test]
fn missing_stream_is_source_unavailable() {
    let mut h = harness(SimMedia::video(640, 360));
    h.session.connect_local_stream("pipe-1").unwrap();
    h.session.load_media(StreamType::File, "a.mp4", 0.1, 0.9).unwrap();
    let positions_before = h.engine.applied_positions().len();

    let err = h
        .session
        .load_media(StreamType::LocalFileStream, "nope", 0.0, 1.0)
        .unwrap_err();
    assert!(matches!(err, PlayerError::SourceUnavailable { .. }));
    assert!(!h.session.has_active_stream());
    // Range and engine untouched
    assert_eq!(h.session.range().start(), 0.1);
    assert_eq!(h.engine.applied_positions().len(), positions_before);
}

#[test]
fn seek_after_end_rebuffers() {
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
    h.engine.finish();
    h.engine.flush();
    assert_eq!(h.session.engine_state(), EngineState::Ended);

    h.session.seek(0.3).unwrap();
    assert_eq!(h.session.engine_state(), EngineState::Paused);
    assert_eq!(h.engine.time_ms(), 3_000);
}

#[test]
fn volume_mute_and_rate_pass_through() {
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();

    h.session.set_volume(80).unwrap();
    assert!(h.session.set_volume(500).is_err());
    assert_eq!(h.session.state().volume(), 80);

    h.session.set_playback_speed(2.0).unwrap();
    assert!(h.session.set_playback_speed(0.0).is_err());
    assert_eq!(h.session.state().rate(), 2.0);

    h.session.set_mute(true);
    assert!(h.session.state().is_muted());
}

#[test]
fn drop_releases_everything_in_order() {
    let transport = SimTransport::new().with_file("s", vec![1u8; 32]);
    let mut h = harness_with(SimMedia::video(640, 360), transport);
    h.session.connect_local_stream("pipe").unwrap();
    h.session.load_media(StreamType::LocalFileStream, "s", 0.0, 1.0).unwrap();
    assert!(h.library.has_log_handler());
    let releases = h.library.release_log();
    assert!(releases.lock().is_empty());

    let Harness { session, engine, library } = h;
    drop(session);

    assert_eq!(*releases.lock(), vec!["stream", "engine", "library", "transport"]);
    assert_eq!(engine.input_detached(), Some(true));
    assert_eq!(engine.subscription_count(), 0);
    assert!(engine.is_released());
    assert!(library.is_released());
    assert!(!library.has_log_handler());
}

#[test]
fn drop_keeps_releasing_after_engine_failure() {
    let mut h = harness(SimMedia::video(640, 360));
    h.session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
    let releases = h.library.release_log();

    // Released behind the session's back, so its own release call fails
    h.engine.release().unwrap();
    let Harness { session, library, .. } = h;
    drop(session);

    assert_eq!(*releases.lock(), vec!["engine", "engine", "library", "transport"]);
    assert!(library.is_released());
}
