//! Playback session: the controller bound to one rendering surface.
//!
//! **Architecture**: the session owns the engine instance, the stream
//! transport client and the active source. State that engine callbacks touch
//! (range, cached time, geometry latch, event bus, workers) lives in
//! [`Shared`], which the callbacks hold by `Arc`.
//!
//! # Load
//!
//! `load_media` validates the range, resolves the source, installs it,
//! blocks in the buffering checkpoint (bounded), then seeks to the range
//! start. A failed resolve leaves the previous range untouched.
//!
//! # Range
//!
//! Every seek and step lands inside `[start, stop]`. When the engine reports
//! a position at or past `stop` while playing, a pause is queued on the
//! session workers; it is dropped if a newer load started in the meantime.
//! Playback stays paused until the next explicit `play()`.
//!
//! # Stepping
//!
//! One frame is `1000 / fps` ms. Forward uses the engine's single-frame
//! advance while a whole frame fits before `stop`, and otherwise seeks to
//! `stop`. Backward has no engine primitive and is a clamped seek to the
//! cached time minus one frame.
//!
//! # Disposal
//!
//! Drop removes the session's engine subscriptions, then releases in order:
//! stream input, backing stream, engine, decode library, stream transport.
//! A failing step is logged and the later steps still run.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::core::buffering::{BufferingSynchronizer, DEFAULT_BUFFERING_TIMEOUT};
use crate::core::event_bus::EventBus;
use crate::core::geometry::GeometryResolver;
use crate::core::normalizer;
use crate::core::player_events::TimeChanged;
use crate::core::runtime;
use crate::core::snapshot::{SnapshotCoordinator, DEFAULT_SNAPSHOT_TIMEOUT};
use crate::core::source::{MediaSource, SourceResolver, StreamType};
use crate::core::state::{PlaybackRange, SessionState};
use crate::core::workers::Workers;
use crate::engine::{
    EngineLibrary, EngineLogRecord, EngineState, EngineSubscription, MediaEngine, StreamTransport,
    SurfaceHandle, TrackDescriptor,
};
use crate::error::{PlayerError, Result};

/// Tunables for one session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    pub buffering_timeout: Duration,
    pub snapshot_timeout: Duration,
    /// Threads serving fire-and-forget engine calls (at least one)
    pub boundary_workers: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffering_timeout: DEFAULT_BUFFERING_TIMEOUT,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            boundary_workers: 1,
        }
    }
}

/// Milliseconds per frame, None when the engine reports no usable rate
pub fn frame_step_ms(fps: f32) -> Option<f64> {
    (fps.is_finite() && fps > 0.0).then(|| 1000.0 / fps as f64)
}

/// Session state reachable from engine callbacks
pub(crate) struct Shared {
    pub(crate) state: SessionState,
    pub(crate) geometry: GeometryResolver,
    pub(crate) bus: EventBus,
    workers: Workers,
    /// Load generation; queued pauses from an older load are skipped
    epoch: Arc<AtomicU64>,
}

impl Shared {
    fn new(worker_threads: usize) -> Result<Arc<Self>> {
        let epoch = Arc::new(AtomicU64::new(0));
        let workers = Workers::new(worker_threads, Arc::clone(&epoch)).map_err(PlayerError::Workers)?;
        Ok(Arc::new(Self {
            state: SessionState::default(),
            geometry: GeometryResolver::new(),
            bus: EventBus::new(),
            workers,
            epoch,
        }))
    }

    /// Start a new load generation
    fn begin_load(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Queue a pause when a playing engine reaches the stop boundary.
    ///
    /// Called on the engine delivery thread, so the pause itself never runs
    /// inline. At most one pause per boundary hit.
    pub(crate) fn watch_boundary(&self, engine: &Arc<dyn MediaEngine>, position: f32) {
        let stop = self.state.range().stop();
        if position < stop || engine.state() != EngineState::Playing {
            return;
        }
        if !self.state.latch_boundary() {
            return;
        }

        debug!("Stop boundary reached ({:.4} >= {:.4}), pausing", position, stop);
        let weak = Arc::downgrade(engine);
        self.workers.execute_with_epoch(self.workers.current_epoch(), move || {
            if let Some(engine) = weak.upgrade() {
                engine.pause();
            }
        });
    }
}

/// Playback controller for one surface
pub struct Session {
    surface: SurfaceHandle,
    shared: Arc<Shared>,
    resolver: SourceResolver,
    transport: Box<dyn StreamTransport>,
    engine: Arc<dyn MediaEngine>,
    library: Arc<dyn EngineLibrary>,
    subscriptions: Vec<EngineSubscription>,
    buffering: BufferingSynchronizer,
    snapshots: SnapshotCoordinator,
}

impl Session {
    /// Create the engine instance for `surface` and start listening to it.
    ///
    /// The library is initialized with the runtime's engine flags first.
    /// Fails with [`PlayerError::NotInitialized`] before [`runtime::init`].
    pub fn new(
        library: Arc<dyn EngineLibrary>,
        surface: SurfaceHandle,
        transport: Box<dyn StreamTransport>,
        options: SessionOptions,
    ) -> Result<Self> {
        let Some(runtime) = runtime::options() else {
            return Err(PlayerError::NotInitialized);
        };

        let shared = Shared::new(options.boundary_workers)?;

        library.init(&runtime.engine_args)?;
        library.set_log_handler(Some(Arc::new(|record: &EngineLogRecord| {
            debug!(target: "playctl::engine", "{} {} {}", record.module, record.level, record.message);
        })));
        let engine = library.create_engine(surface)?;
        let subscriptions = normalizer::attach(&engine, &shared);

        info!(
            "Session created for surface {:?} (buffering {:?}, snapshot {:?})",
            surface, options.buffering_timeout, options.snapshot_timeout
        );

        Ok(Self {
            surface,
            shared,
            resolver: SourceResolver::new(),
            transport,
            engine,
            library,
            subscriptions,
            buffering: BufferingSynchronizer::new(options.buffering_timeout),
            snapshots: SnapshotCoordinator::new(options.snapshot_timeout),
        })
    }

    // ===================
    //      Accessors
    // ===================

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// Public event surface
    pub fn events(&self) -> &EventBus {
        &self.shared.bus
    }

    pub fn state(&self) -> &SessionState {
        &self.shared.state
    }

    pub fn range(&self) -> PlaybackRange {
        self.shared.state.range()
    }

    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    pub fn has_active_stream(&self) -> bool {
        self.resolver.has_active_stream()
    }

    /// Known media length, asking the engine when no length event arrived yet
    fn length_ms(&self) -> i64 {
        let cached = self.shared.state.length_ms();
        if cached > 0 { cached } else { self.engine.length_ms().max(0) }
    }

    // ======================
    //      Stream transport
    // ======================

    pub fn connect_local_stream(&mut self, id: &str) -> Result<()> {
        self.transport
            .connect(id)
            .map_err(|e| PlayerError::Transport(format!("connect {}: {}", id, e)))?;
        info!("Connected local stream transport {}", id);
        Ok(())
    }

    pub fn disconnect_local_stream(&mut self) -> Result<()> {
        self.transport
            .disconnect()
            .map_err(|e| PlayerError::Transport(format!("disconnect: {}", e)))?;
        info!("Disconnected local stream transport");
        Ok(())
    }

    // ===================
    //      Load
    // ===================

    /// Load `locator` and leave the session paused at `start`.
    ///
    /// Blocks for at most the buffering timeout. Buffering that does not
    /// finish in time is logged and the load carries on.
    pub fn load_media(&mut self, stream_type: StreamType, locator: &str, start: f32, stop: f32) -> Result<()> {
        let range = PlaybackRange::new(start, stop)?;
        let source = MediaSource::new(stream_type, locator);
        let handle = self.resolver.resolve(&source, self.transport.as_mut())?;

        let epoch = self.shared.begin_load();
        self.shared.state.reset_for_load(range);
        self.shared.geometry.reset();

        if let Err(e) = self.engine.set_media(handle) {
            self.resolver.release();
            return Err(e.into());
        }

        self.buffering.run(&*self.engine)?;
        self.seek(range.start())?;

        info!(
            "Loaded {} (load #{}, range {:.3}..{:.3})",
            locator, epoch, range.start(), range.stop()
        );
        Ok(())
    }

    // ===================
    //      Transport
    // ===================

    /// Resume playback. Media that already ended restarts.
    pub fn play(&self) -> Result<()> {
        if self.engine.state() == EngineState::Ended {
            debug!("Media ended, stopping before play");
            self.engine.stop();
        }
        self.shared.state.reset_boundary();
        self.engine.play()?;
        Ok(())
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    /// Seek to `position`, clamped into the active range.
    pub fn seek(&self, position: f32) -> Result<()> {
        let target = self.shared.state.range().clamp(position);
        if target != position {
            trace!("Seek {} clamped to {}", position, target);
        }

        // An ended engine ignores positioning until restarted
        if self.engine.state() == EngineState::Ended {
            debug!("Media ended, rebuffering before seek");
            self.engine.stop();
            self.buffering.run(&*self.engine)?;
        }

        // Cache first so the engine's own time echo lands last
        let time_ms = target as f64 * self.length_ms() as f64;
        self.shared.state.set_current_time_ms(time_ms);
        self.shared.state.reset_boundary();
        self.engine.set_position(target);
        self.shared.bus.emit(TimeChanged(time_ms as i64));
        Ok(())
    }

    pub fn set_playback_speed(&self, rate: f32) -> Result<()> {
        self.engine.set_rate(rate)?;
        self.shared.state.set_rate(rate);
        Ok(())
    }

    pub fn set_volume(&self, level: i32) -> Result<()> {
        self.engine.set_volume(level)?;
        self.shared.state.set_volume(level);
        Ok(())
    }

    pub fn set_mute(&self, mute: bool) {
        self.engine.set_mute(mute);
        self.shared.state.set_muted(mute);
    }

    // ===================
    //      Stepping
    // ===================

    /// Advance one frame, never past the stop boundary.
    ///
    /// A frame that would overshoot `stop` becomes a paused seek to `stop`;
    /// the engine's native advance only runs when the whole frame fits.
    pub fn step_forward(&self) -> Result<()> {
        let Some(step) = frame_step_ms(self.engine.fps()) else {
            warn!("Cannot step: engine reports no frame rate");
            return Ok(());
        };

        let current = self.shared.state.current_time_ms();
        let length = self.length_ms();
        let stop = self.shared.state.range().stop();
        let stop_ms = (length > 0).then(|| stop as f64 * length as f64);
        if let Some(stop_ms) = stop_ms {
            if current >= stop_ms {
                trace!("At stop boundary, not stepping");
                return Ok(());
            }
            if current + step > stop_ms {
                trace!("Frame step would pass stop, seeking to {:.4}", stop);
                self.engine.pause();
                return self.seek(stop);
            }
        }

        self.engine.next_frame();

        let time_ms = current + step;
        self.shared.state.set_current_time_ms(time_ms);
        self.shared.bus.emit(TimeChanged(time_ms as i64));
        Ok(())
    }

    /// Go back one frame by seeking, never before the start boundary.
    pub fn step_back(&self) -> Result<()> {
        self.engine.pause();

        let Some(step) = frame_step_ms(self.engine.fps()) else {
            warn!("Cannot step: engine reports no frame rate");
            return Ok(());
        };
        let length = self.length_ms();
        if length <= 0 {
            warn!("Cannot step back: media length unknown");
            return Ok(());
        }

        let time_ms = (self.shared.state.current_time_ms() - step).max(0.0);
        self.seek((time_ms / length as f64) as f32)
    }

    // ===================
    //      Capture
    // ===================

    /// Write a snapshot of video output `output` to `path`.
    ///
    /// False when no video track is selected or nothing was written in time.
    pub fn capture_snapshot(&self, output: u32, width: u32, height: u32, path: impl AsRef<Path>) -> bool {
        self.snapshots.capture(&*self.engine, output, width, height, path.as_ref())
    }

    // ===================
    //      Tracks
    // ===================

    /// Audio tracks as reported by the engine, queried fresh each call
    pub fn audio_tracks(&self) -> Vec<TrackDescriptor> {
        self.engine.audio_track_descriptions()
    }

    /// Video tracks as reported by the engine, queried fresh each call
    pub fn video_tracks(&self) -> Vec<TrackDescriptor> {
        self.engine.video_track_descriptions()
    }

    pub fn set_audio_track(&self, id: i32) -> Result<()> {
        self.engine.set_audio_track(id)?;
        debug!("Audio track set to {}", id);
        Ok(())
    }

    pub fn set_video_track(&self, id: i32) -> Result<()> {
        self.engine.set_video_track(id)?;
        debug!("Video track set to {}", id);
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.engine.unsubscribe(subscription);
        }

        self.resolver.release();

        if let Err(e) = self.engine.release() {
            warn!("Failed to release engine: {}", e);
        }

        self.library.set_log_handler(None);
        if let Err(e) = self.library.release() {
            warn!("Failed to release decode library: {}", e);
        }

        if let Err(e) = self.transport.close() {
            warn!("Failed to close stream transport: {}", e);
        }

        info!("Session for surface {:?} disposed", self.surface);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::player_events::{LengthChanged, Muted, VideoInfoChanged};
    use crate::core::runtime::RuntimeOptions;
    use crate::sim::{SimEngine, SimLibrary, SimMedia, SimTransport};
    use std::sync::Mutex;

    fn session(profile: SimMedia) -> (Session, Arc<SimEngine>) {
        runtime::init(RuntimeOptions::default());
        let library = SimLibrary::new(profile);
        let session = Session::new(
            library.clone(),
            SurfaceHandle(1),
            Box::new(SimTransport::new()),
            SessionOptions {
                buffering_timeout: Duration::from_secs(2),
                ..SessionOptions::default()
            },
        )
        .unwrap();
        let engine = library.engine().unwrap();
        (session, engine)
    }

    fn record<E: Clone + Send + Sync + 'static>(bus: &EventBus) -> Arc<Mutex<Vec<E>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.subscribe::<E, _>(move |e: &E| s.lock().unwrap().push(e.clone()));
        seen
    }

    #[test]
    fn test_frame_step() {
        assert_eq!(frame_step_ms(25.0), Some(40.0));
        assert_eq!(frame_step_ms(0.0), None);
        assert_eq!(frame_step_ms(f32::NAN), None);
    }

    #[test]
    fn test_invalid_range_keeps_previous_state() {
        let (mut session, engine) = session(SimMedia::video(320, 240));
        session.load_media(StreamType::File, "a.mp4", 0.1, 0.9).unwrap();

        let err = session.load_media(StreamType::File, "b.mp4", 0.9, 0.1).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidRange { .. }));
        assert_eq!(session.range(), PlaybackRange::new(0.1, 0.9).unwrap());
        drop(session);
        assert!(engine.is_released());
    }

    #[test]
    fn test_load_publishes_length_and_geometry() {
        let (mut session, engine) = session(SimMedia::video(640, 480));
        let lengths = record::<LengthChanged>(session.events());
        let infos = record::<VideoInfoChanged>(session.events());

        session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
        engine.flush();

        assert_eq!(*lengths.lock().unwrap(), vec![LengthChanged(10_000)]);
        let infos = infos.lock().unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].orientation, "TopLeft");
        assert!((infos[0].aspect_ratio - 4.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_step_forward_clamps_to_stop() {
        let (mut session, engine) = session(SimMedia::video(320, 240));
        session.load_media(StreamType::File, "a.mp4", 0.0, 0.5).unwrap();
        session.seek(0.5).unwrap();
        engine.flush();

        session.step_forward().unwrap();
        engine.flush();
        assert_eq!(session.state().current_time_ms(), 5_000.0);
        assert_eq!(engine.time_ms(), 5_000);
    }

    #[test]
    fn test_partial_frame_before_stop_lands_on_stop() {
        let (mut session, engine) = session(SimMedia::video(320, 240).with_fps(25.0));
        session.load_media(StreamType::File, "a.mp4", 0.0, 0.5).unwrap();
        session.seek(0.499).unwrap();
        engine.flush();

        session.step_forward().unwrap();
        engine.flush();
        assert!(engine.time_ms() <= 5_000);
        assert!((session.state().current_time_ms() - 5_000.0).abs() < 1.0);
        assert_eq!(engine.applied_positions().last(), Some(&0.5));
        assert_eq!(session.engine_state(), EngineState::Paused);
    }

    #[test]
    fn test_library_gets_runtime_flags() {
        let library = SimLibrary::new(SimMedia::audio_only());
        runtime::init(RuntimeOptions::default());
        let _session = Session::new(
            library.clone(),
            SurfaceHandle(2),
            Box::new(SimTransport::new()),
            SessionOptions::default(),
        )
        .unwrap();

        let expected = runtime::options().map(|o| o.engine_args.clone());
        assert!(expected.is_some());
        assert_eq!(library.engine_args(), expected);
    }

    #[test]
    fn test_late_time_echo_stays_in_range() {
        let (mut session, engine) = session(SimMedia::video(320, 240));
        session.load_media(StreamType::File, "a.mp4", 0.2, 0.6).unwrap();
        engine.flush();

        engine.emit(crate::engine::EngineEvent::TimeChanged(9_000));
        engine.flush();
        assert_eq!(session.state().current_time_ms(), 6_000.0);

        engine.emit(crate::engine::EngineEvent::TimeChanged(100));
        engine.flush();
        assert_eq!(session.state().current_time_ms(), 2_000.0);
    }

    #[test]
    fn test_mute_updates_state_and_bus() {
        let (mut session, engine) = session(SimMedia::audio_only());
        let muted = record::<Muted>(session.events());
        session.load_media(StreamType::File, "a.flac", 0.0, 1.0).unwrap();

        session.set_mute(true);
        engine.flush();
        assert!(session.state().is_muted());
        assert_eq!(muted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_play_after_end_restarts() {
        let (mut session, engine) = session(SimMedia::video(320, 240));
        session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
        engine.finish();
        engine.flush();
        assert_eq!(session.engine_state(), EngineState::Ended);

        session.play().unwrap();
        assert_eq!(session.engine_state(), EngineState::Playing);
        assert_eq!(engine.time_ms(), 0);
    }

    #[test]
    fn test_engine_errors_are_not_fatal() {
        let (mut session, engine) = session(SimMedia::video(320, 240));
        session.load_media(StreamType::File, "a.mp4", 0.0, 1.0).unwrap();
        engine.emit(crate::engine::EngineEvent::EncounteredError("decoder hiccup".into()));
        engine.flush();
        assert!(session.seek(0.5).is_ok());
    }
}
