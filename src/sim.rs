//! Scripted in-process engine.
//!
//! Implements the engine and transport traits without native code so the
//! controller can be driven end-to-end: by the `playctl` dry-run binary and by
//! tests. Callbacks are delivered on a dedicated thread in the order they were
//! raised, like a native engine's event manager.
//!
//! Behavior is configured per engine through [`SimMedia`]; tests can also
//! inject raw events with [`SimEngine::emit`] and wait for delivery with
//! [`SimEngine::flush`]. Teardown calls on the library, its engines and the
//! transport's streams are appended to one [`ReleaseLog`].

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::engine::{
    ByteStream, EngineError, EngineEvent, EngineEventKind, EngineHandler, EngineLibrary,
    EngineLogHandler, EngineLogRecord, EngineResult, EngineState, EngineSubscription, MediaEngine,
    MediaHandle, MediaTrack, StreamInput, StreamTransport, SurfaceHandle, TrackDescriptor,
    TrackKind, VideoOrientation,
};

/// Teardown calls in the order they happened
pub type ReleaseLog = Arc<Mutex<Vec<&'static str>>>;

/// What the engine does when asked for a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotBehavior {
    /// Write the file, then fire the completion callback with its canonical path
    Callback,
    /// Write the file but never fire the callback
    FileOnly,
    /// Do nothing
    Drop,
}

/// Media profile the engine pretends to have opened
#[derive(Clone, Debug)]
pub struct SimMedia {
    pub length_ms: i64,
    pub fps: f32,
    /// Pixel size; None for audio-only media
    pub video_size: Option<(u32, u32)>,
    pub orientation: VideoOrientation,
    pub sar: (u32, u32),
    pub audio_tracks: Vec<TrackDescriptor>,
    /// Whether buffering reaches 100% after play
    pub buffering_completes: bool,
    pub snapshot: SnapshotBehavior,
}

impl SimMedia {
    pub fn video(width: u32, height: u32) -> Self {
        Self {
            length_ms: 10_000,
            fps: 25.0,
            video_size: Some((width, height)),
            orientation: VideoOrientation::TopLeft,
            sar: (1, 1),
            audio_tracks: vec![TrackDescriptor { id: 1, name: "Track 1".into() }],
            buffering_completes: true,
            snapshot: SnapshotBehavior::Callback,
        }
    }

    pub fn audio_only() -> Self {
        Self {
            video_size: None,
            ..Self::video(0, 0)
        }
    }

    pub fn with_length(mut self, length_ms: i64) -> Self {
        self.length_ms = length_ms;
        self
    }

    pub fn with_fps(mut self, fps: f32) -> Self {
        self.fps = fps;
        self
    }

    pub fn with_orientation(mut self, orientation: VideoOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_sar(mut self, num: u32, den: u32) -> Self {
        self.sar = (num, den);
        self
    }

    pub fn with_audio_tracks(mut self, tracks: Vec<TrackDescriptor>) -> Self {
        self.audio_tracks = tracks;
        self
    }

    pub fn with_buffering(mut self, completes: bool) -> Self {
        self.buffering_completes = completes;
        self
    }

    pub fn with_snapshot(mut self, behavior: SnapshotBehavior) -> Self {
        self.snapshot = behavior;
        self
    }

    fn has_video(&self) -> bool {
        self.video_size.is_some()
    }
}

const VIDEO_TRACK_ID: i32 = 0;

enum Delivery {
    Event(EngineEvent),
    Flush(Sender<()>),
}

type HandlerMap = HashMap<EngineEventKind, Vec<(EngineSubscription, EngineHandler)>>;

struct Playback {
    media: Option<SimMedia>,
    /// Stream input installed by the last stream load
    input: Option<StreamInput>,
    state: EngineState,
    time_ms: f64,
    /// Output size is unknown until the first frame is decoded
    size_known: bool,
    buffered: bool,
    video_track: Option<i32>,
    audio_track: Option<i32>,
}

/// Scripted [`MediaEngine`]
pub struct SimEngine {
    profile: SimMedia,
    playback: Mutex<Playback>,
    handlers: Arc<Mutex<HandlerMap>>,
    deliveries: Sender<Delivery>,
    next_subscription: AtomicU64,
    pause_calls: AtomicUsize,
    snapshot_calls: AtomicUsize,
    positions: Mutex<Vec<f32>>,
    released: AtomicBool,
    releases: ReleaseLog,
}

impl SimEngine {
    pub fn new(profile: SimMedia) -> std::io::Result<Arc<Self>> {
        Self::with_release_log(profile, ReleaseLog::default())
    }

    fn with_release_log(profile: SimMedia, releases: ReleaseLog) -> std::io::Result<Arc<Self>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handlers: Arc<Mutex<HandlerMap>> = Arc::new(Mutex::new(HashMap::new()));
        let thread_handlers = Arc::clone(&handlers);

        thread::Builder::new()
            .name("sim-engine-events".into())
            .spawn(move || deliver_loop(rx, thread_handlers))?;

        Ok(Arc::new(Self {
            profile,
            playback: Mutex::new(Playback {
                media: None,
                input: None,
                state: EngineState::Idle,
                time_ms: 0.0,
                size_known: false,
                buffered: false,
                video_track: None,
                audio_track: None,
            }),
            handlers,
            deliveries: tx,
            next_subscription: AtomicU64::new(1),
            pause_calls: AtomicUsize::new(0),
            snapshot_calls: AtomicUsize::new(0),
            positions: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
            releases,
        }))
    }

    /// Raise an engine event as if the native side produced it
    pub fn emit(&self, event: EngineEvent) {
        trace!("sim emit {:?}", event);
        let _ = self.deliveries.send(Delivery::Event(event));
    }

    /// Block until every event raised so far has been delivered
    pub fn flush(&self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.deliveries.send(Delivery::Flush(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Play through to the end of the media
    pub fn finish(&self) {
        let length = {
            let mut pb = self.playback.lock();
            let length = pb.media.as_ref().map(|m| m.length_ms).unwrap_or(0);
            pb.time_ms = length as f64;
            pb.state = EngineState::Ended;
            length
        };
        self.emit(EngineEvent::TimeChanged(length));
        self.emit(EngineEvent::PositionChanged(1.0));
        self.emit(EngineEvent::EndReached);
    }

    pub fn pause_calls(&self) -> usize {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    /// Every position applied through `set_position`, oldest first
    pub fn applied_positions(&self) -> Vec<f32> {
        self.positions.lock().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.handlers.lock().values().map(Vec::len).sum()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Whether the stream input of the last stream load was detached
    pub fn input_detached(&self) -> Option<bool> {
        self.playback.lock().input.as_ref().map(StreamInput::is_detached)
    }

    fn snapshot_media(&self) -> Option<SimMedia> {
        self.playback.lock().media.clone()
    }
}

fn deliver_loop(rx: Receiver<Delivery>, handlers: Arc<Mutex<HandlerMap>>) {
    // Ends when the engine (sole sender) is dropped
    for delivery in rx {
        match delivery {
            Delivery::Event(event) => {
                // Clone out so handlers can (un)subscribe while running
                let targets: Vec<EngineHandler> = handlers
                    .lock()
                    .get(&event.kind())
                    .map(|v| v.iter().map(|(_, h)| Arc::clone(h)).collect())
                    .unwrap_or_default();
                for handler in targets {
                    handler(&event);
                }
            }
            Delivery::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    trace!("sim event thread stopped");
}

impl MediaEngine for SimEngine {
    fn set_media(&self, media: MediaHandle) -> EngineResult<()> {
        let input = match media {
            MediaHandle::Stream(mut input) => {
                // Read a header the way a demuxer would
                let mut header = [0u8; 16];
                input.read(&mut header)?;
                Some(input)
            }
            MediaHandle::Location(_) => None,
        };
        let profile = self.profile.clone();
        let length = profile.length_ms;
        {
            let mut pb = self.playback.lock();
            pb.input = input;
            pb.video_track = profile.has_video().then_some(VIDEO_TRACK_ID);
            pb.audio_track = profile.audio_tracks.first().map(|t| t.id);
            pb.media = Some(profile);
            pb.state = EngineState::Opening;
            pb.time_ms = 0.0;
            pb.size_known = false;
            pb.buffered = false;
        }
        debug!("sim media installed ({} ms)", length);
        self.emit(EngineEvent::LengthChanged(length));
        Ok(())
    }

    fn play(&self) -> EngineResult<()> {
        let (buffering, completes, time) = {
            let mut pb = self.playback.lock();
            let media = pb
                .media
                .clone()
                .ok_or_else(|| EngineError::Native("no media set".into()))?;
            if pb.state == EngineState::Ended {
                pb.time_ms = 0.0;
            }
            pb.state = EngineState::Playing;
            pb.size_known = true;
            let buffering = !pb.buffered;
            if media.buffering_completes {
                pb.buffered = true;
            }
            (buffering, media.buffering_completes, pb.time_ms as i64)
        };

        self.emit(EngineEvent::Playing);
        if buffering {
            self.emit(EngineEvent::Buffering(0.0));
            self.emit(EngineEvent::Buffering(50.0));
            if completes {
                self.emit(EngineEvent::Buffering(100.0));
            }
        }
        self.emit(EngineEvent::TimeChanged(time));
        Ok(())
    }

    fn pause(&self) {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        let was_playing = {
            let mut pb = self.playback.lock();
            let was_playing = pb.state == EngineState::Playing;
            if was_playing {
                pb.state = EngineState::Paused;
            }
            was_playing
        };
        if was_playing {
            self.emit(EngineEvent::Paused);
        }
    }

    fn stop(&self) {
        {
            let mut pb = self.playback.lock();
            pb.state = EngineState::Stopped;
            pb.time_ms = 0.0;
            pb.buffered = false;
        }
        self.emit(EngineEvent::Stopped);
    }

    fn state(&self) -> EngineState {
        self.playback.lock().state
    }

    fn position(&self) -> f32 {
        let pb = self.playback.lock();
        match &pb.media {
            Some(m) if m.length_ms > 0 => (pb.time_ms / m.length_ms as f64) as f32,
            _ => 0.0,
        }
    }

    fn set_position(&self, position: f32) {
        let position = position.clamp(0.0, 1.0);
        self.positions.lock().push(position);
        let time = {
            let mut pb = self.playback.lock();
            let length = pb.media.as_ref().map(|m| m.length_ms).unwrap_or(0);
            pb.time_ms = position as f64 * length as f64;
            pb.time_ms as i64
        };
        self.emit(EngineEvent::TimeChanged(time));
        self.emit(EngineEvent::PositionChanged(position));
    }

    fn time_ms(&self) -> i64 {
        self.playback.lock().time_ms as i64
    }

    fn length_ms(&self) -> i64 {
        self.playback.lock().media.as_ref().map(|m| m.length_ms).unwrap_or(-1)
    }

    fn fps(&self) -> f32 {
        self.playback.lock().media.as_ref().map(|m| m.fps).unwrap_or(0.0)
    }

    fn set_rate(&self, rate: f32) -> EngineResult<()> {
        if rate.is_nan() || rate <= 0.0 {
            return Err(EngineError::Native(format!("invalid rate {}", rate)));
        }
        Ok(())
    }

    fn set_volume(&self, volume: i32) -> EngineResult<()> {
        if !(0..=200).contains(&volume) {
            return Err(EngineError::Native(format!("volume out of range: {}", volume)));
        }
        self.emit(EngineEvent::VolumeChanged(volume as f32 / 100.0));
        Ok(())
    }

    fn set_mute(&self, mute: bool) {
        self.emit(if mute { EngineEvent::Muted } else { EngineEvent::Unmuted });
    }

    fn next_frame(&self) {
        let time = {
            let mut pb = self.playback.lock();
            let Some(fps) = pb.media.as_ref().map(|m| m.fps) else {
                return;
            };
            if pb.state == EngineState::Playing {
                pb.state = EngineState::Paused;
            }
            pb.time_ms += 1000.0 / fps as f64;
            pb.time_ms as i64
        };
        self.emit(EngineEvent::TimeChanged(time));
    }

    fn take_snapshot(&self, output: u32, path: &Path, width: u32, height: u32) -> EngineResult<()> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        let media = self
            .snapshot_media()
            .ok_or_else(|| EngineError::Native("no media set".into()))?;
        debug!("sim snapshot #{} {}x{} -> {}", output, width, height, path.display());

        match media.snapshot {
            SnapshotBehavior::Callback => {
                std::fs::write(path, b"SIMPNG")?;
                let written = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
                self.emit(EngineEvent::SnapshotTaken(written));
            }
            SnapshotBehavior::FileOnly => {
                std::fs::write(path, b"SIMPNG")?;
            }
            SnapshotBehavior::Drop => {}
        }
        Ok(())
    }

    fn video_size(&self, output: u32) -> Option<(u32, u32)> {
        let pb = self.playback.lock();
        if output != 0 || !pb.size_known {
            return None;
        }
        pb.media.as_ref().and_then(|m| m.video_size)
    }

    fn tracks(&self) -> Vec<MediaTrack> {
        let Some(media) = self.snapshot_media() else {
            return Vec::new();
        };
        let mut tracks: Vec<MediaTrack> = media
            .audio_tracks
            .iter()
            .map(|t| MediaTrack { id: t.id, kind: TrackKind::Audio })
            .collect();
        if media.has_video() {
            tracks.push(MediaTrack {
                id: VIDEO_TRACK_ID,
                kind: TrackKind::Video {
                    orientation: media.orientation,
                    sar_num: media.sar.0,
                    sar_den: media.sar.1,
                },
            });
        }
        tracks
    }

    fn audio_track_descriptions(&self) -> Vec<TrackDescriptor> {
        self.snapshot_media().map(|m| m.audio_tracks).unwrap_or_default()
    }

    fn video_track_descriptions(&self) -> Vec<TrackDescriptor> {
        match self.snapshot_media() {
            Some(media) if media.has_video() => vec![TrackDescriptor {
                id: VIDEO_TRACK_ID,
                name: "Track 1".into(),
            }],
            _ => Vec::new(),
        }
    }

    fn video_track(&self) -> Option<i32> {
        self.playback.lock().video_track
    }

    fn set_audio_track(&self, id: i32) -> EngineResult<()> {
        let mut pb = self.playback.lock();
        let known = id == -1
            || pb
                .media
                .as_ref()
                .is_some_and(|m| m.audio_tracks.iter().any(|t| t.id == id));
        if !known {
            return Err(EngineError::Native(format!("unknown audio track {}", id)));
        }
        pb.audio_track = (id != -1).then_some(id);
        Ok(())
    }

    fn set_video_track(&self, id: i32) -> EngineResult<()> {
        let mut pb = self.playback.lock();
        let has_video = pb.media.as_ref().is_some_and(SimMedia::has_video);
        match id {
            -1 => pb.video_track = None,
            VIDEO_TRACK_ID if has_video => pb.video_track = Some(id),
            _ => return Err(EngineError::Native(format!("unknown video track {}", id))),
        }
        Ok(())
    }

    fn subscribe(&self, kind: EngineEventKind, handler: EngineHandler) -> EngineSubscription {
        let id = EngineSubscription(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.handlers.lock().entry(kind).or_default().push((id, handler));
        id
    }

    fn unsubscribe(&self, subscription: EngineSubscription) {
        for list in self.handlers.lock().values_mut() {
            list.retain(|(id, _)| *id != subscription);
        }
    }

    fn release(&self) -> EngineResult<()> {
        self.releases.lock().push("engine");
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Native("engine already released".into()));
        }
        self.handlers.lock().clear();
        let mut pb = self.playback.lock();
        pb.media = None;
        pb.state = EngineState::Idle;
        Ok(())
    }
}

/// Scripted [`EngineLibrary`]; remembers the engines it created
pub struct SimLibrary {
    profile: SimMedia,
    /// Flags from `init`; engines can only be created after it
    args: Mutex<Option<Vec<String>>>,
    engines: Mutex<Vec<Arc<SimEngine>>>,
    log_handler: Mutex<Option<EngineLogHandler>>,
    released: AtomicBool,
    releases: ReleaseLog,
}

impl SimLibrary {
    pub fn new(profile: SimMedia) -> Arc<Self> {
        Arc::new(Self {
            profile,
            args: Mutex::new(None),
            engines: Mutex::new(Vec::new()),
            log_handler: Mutex::new(None),
            released: AtomicBool::new(false),
            releases: ReleaseLog::default(),
        })
    }

    /// Log shared by this library and every engine it creates
    pub fn release_log(&self) -> ReleaseLog {
        Arc::clone(&self.releases)
    }

    /// Flags the library was initialized with
    pub fn engine_args(&self) -> Option<Vec<String>> {
        self.args.lock().clone()
    }

    /// Most recently created engine
    pub fn engine(&self) -> Option<Arc<SimEngine>> {
        self.engines.lock().last().cloned()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn has_log_handler(&self) -> bool {
        self.log_handler.lock().is_some()
    }

    fn log(&self, level: log::Level, message: String) {
        let handler = self.log_handler.lock().clone();
        if let Some(handler) = handler {
            handler(&EngineLogRecord {
                module: "sim".into(),
                level,
                message,
            });
        }
    }
}

impl EngineLibrary for SimLibrary {
    fn init(&self, args: &[String]) -> EngineResult<()> {
        let mut current = self.args.lock();
        match current.as_deref() {
            Some(existing) if existing == args => Ok(()),
            Some(_) => Err(EngineError::Native("library already initialized with other flags".into())),
            None => {
                debug!("sim library initialized with {:?}", args);
                *current = Some(args.to_vec());
                Ok(())
            }
        }
    }

    fn create_engine(&self, surface: SurfaceHandle) -> EngineResult<Arc<dyn MediaEngine>> {
        if self.released.load(Ordering::SeqCst) {
            return Err(EngineError::Native("library released".into()));
        }
        if self.args.lock().is_none() {
            return Err(EngineError::Native("library not initialized".into()));
        }
        let engine = SimEngine::with_release_log(self.profile.clone(), self.release_log())?;
        self.engines.lock().push(Arc::clone(&engine));
        self.log(log::Level::Debug, format!("engine created for surface {:?}", surface));
        Ok(engine)
    }

    fn set_log_handler(&self, handler: Option<EngineLogHandler>) {
        *self.log_handler.lock() = handler;
    }

    fn release(&self) -> EngineResult<()> {
        self.releases.lock().push("library");
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport-served stream over an in-memory blob
struct SimStream {
    data: Cursor<Vec<u8>>,
    releases: ReleaseLog,
}

impl Read for SimStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.data.read(buf)
    }
}

impl Seek for SimStream {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.data.seek(pos)
    }
}

impl ByteStream for SimStream {
    fn close(&mut self) -> std::io::Result<()> {
        self.releases.lock().push("stream");
        Ok(())
    }
}

/// In-memory [`StreamTransport`] serving registered blobs
#[derive(Default)]
pub struct SimTransport {
    files: HashMap<String, Vec<u8>>,
    connected: Option<String>,
    releases: ReleaseLog,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, locator: &str, bytes: Vec<u8>) -> Self {
        self.files.insert(locator.to_string(), bytes);
        self
    }

    /// Record stream and transport teardown into `releases`
    pub fn with_release_log(mut self, releases: ReleaseLog) -> Self {
        self.releases = releases;
        self
    }
}

impl StreamTransport for SimTransport {
    fn connect(&mut self, id: &str) -> EngineResult<()> {
        debug!("sim transport connected to {}", id);
        self.connected = Some(id.to_string());
        Ok(())
    }

    fn open_stream(&mut self, locator: &str) -> EngineResult<Box<dyn ByteStream>> {
        if self.connected.is_none() {
            return Err(EngineError::Native("transport not connected".into()));
        }
        let bytes = self.files.get(locator).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("{} not served", locator))
        })?;
        Ok(Box::new(SimStream {
            data: Cursor::new(bytes),
            releases: Arc::clone(&self.releases),
        }))
    }

    fn disconnect(&mut self) -> EngineResult<()> {
        if self.connected.take().is_none() {
            warn!("sim transport disconnect without connection");
        }
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        self.connected = None;
        self.releases.lock().push("transport");
        Ok(())
    }
}
