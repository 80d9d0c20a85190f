//! Engine and transport capability interfaces.
//!
//! The controller never talks to a native decoder directly. It consumes:
//! - [`EngineLibrary`]: process-wide decode library, creates engines
//! - [`MediaEngine`]: one player instance bound to a rendering surface
//! - [`StreamTransport`]: byte-stream channel to the process owning the media
//!
//! Engine callbacks arrive on the engine's own thread(s) as [`EngineEvent`]s.
//! Handlers must return promptly - never block inside one.

use std::fmt;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors reported by engine or transport implementations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Native call failed
    #[error("engine error: {0}")]
    Native(String),

    /// Capability not provided by this engine
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Transport I/O failure
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Opaque native window/surface handle the engine renders into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub i64);

/// Engine playback state as reported by the native player
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Opening,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

/// Video orientation flag carried in track metadata
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum VideoOrientation {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    LeftTop,
    LeftBottom,
    RightTop,
    RightBottom,
}

impl VideoOrientation {
    /// Orientations whose display axes are swapped relative to pixel axes
    pub fn is_rotated(self) -> bool {
        matches!(
            self,
            VideoOrientation::RightTop | VideoOrientation::LeftBottom | VideoOrientation::RightBottom
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            VideoOrientation::TopLeft => "TopLeft",
            VideoOrientation::TopRight => "TopRight",
            VideoOrientation::BottomLeft => "BottomLeft",
            VideoOrientation::BottomRight => "BottomRight",
            VideoOrientation::LeftTop => "LeftTop",
            VideoOrientation::LeftBottom => "LeftBottom",
            VideoOrientation::RightTop => "RightTop",
            VideoOrientation::RightBottom => "RightBottom",
        }
    }
}

impl fmt::Display for VideoOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-track metadata from the loaded media
#[derive(Clone, Debug, PartialEq)]
pub enum TrackKind {
    Audio,
    Video {
        orientation: VideoOrientation,
        /// Sample aspect ratio numerator
        sar_num: u32,
        /// Sample aspect ratio denominator (0 = unknown)
        sar_den: u32,
    },
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaTrack {
    pub id: i32,
    pub kind: TrackKind,
}

/// Track id + display name, as listed to the application
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub id: i32,
    pub name: String,
}

/// Raw engine callbacks
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    EndReached,
    TimeChanged(i64),
    PositionChanged(f32),
    LengthChanged(i64),
    /// Buffering progress, 0..=100
    Buffering(f32),
    Playing,
    Paused,
    Stopped,
    VolumeChanged(f32),
    Muted,
    Unmuted,
    SnapshotTaken(PathBuf),
    EncounteredError(String),
}

/// Discriminant used to subscribe to one kind of engine event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EngineEventKind {
    EndReached,
    TimeChanged,
    PositionChanged,
    LengthChanged,
    Buffering,
    Playing,
    Paused,
    Stopped,
    VolumeChanged,
    Muted,
    Unmuted,
    SnapshotTaken,
    EncounteredError,
}

impl EngineEvent {
    pub fn kind(&self) -> EngineEventKind {
        match self {
            EngineEvent::EndReached => EngineEventKind::EndReached,
            EngineEvent::TimeChanged(_) => EngineEventKind::TimeChanged,
            EngineEvent::PositionChanged(_) => EngineEventKind::PositionChanged,
            EngineEvent::LengthChanged(_) => EngineEventKind::LengthChanged,
            EngineEvent::Buffering(_) => EngineEventKind::Buffering,
            EngineEvent::Playing => EngineEventKind::Playing,
            EngineEvent::Paused => EngineEventKind::Paused,
            EngineEvent::Stopped => EngineEventKind::Stopped,
            EngineEvent::VolumeChanged(_) => EngineEventKind::VolumeChanged,
            EngineEvent::Muted => EngineEventKind::Muted,
            EngineEvent::Unmuted => EngineEventKind::Unmuted,
            EngineEvent::SnapshotTaken(_) => EngineEventKind::SnapshotTaken,
            EngineEvent::EncounteredError(_) => EngineEventKind::EncounteredError,
        }
    }
}

/// Engine callback. Invoked on the engine's delivery thread.
pub type EngineHandler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Handle returned by [`MediaEngine::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EngineSubscription(pub u64);

/// Diagnostic record forwarded from the native library
#[derive(Clone, Debug)]
pub struct EngineLogRecord {
    pub module: String,
    pub level: log::Level,
    pub message: String,
}

pub type EngineLogHandler = Arc<dyn Fn(&EngineLogRecord) + Send + Sync>;

/// Readable byte source handed over by the stream transport
pub trait ByteStream: Read + Seek + Send {
    /// Release the underlying channel. Called once during disposal.
    fn close(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ByteStream for std::io::Cursor<Vec<u8>> {}
impl ByteStream for std::fs::File {}

/// Shared, seekable reader over a [`ByteStream`].
///
/// The engine reads through its own clone; the session keeps one so it can
/// detach the input and close the backing stream on reload or drop. Once
/// detached, reads and seeks on every clone fail with `BrokenPipe`.
#[derive(Clone)]
pub struct StreamInput {
    inner: Arc<Mutex<Box<dyn ByteStream>>>,
    detached: Arc<AtomicBool>,
}

impl StreamInput {
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
            detached: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Stop serving reads to the engine
    pub(crate) fn detach(&self) {
        self.detached.store(true, Ordering::Release);
    }

    /// Close the backing byte stream
    pub(crate) fn close(&self) -> std::io::Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).close()
    }

    fn check_attached(&self) -> std::io::Result<()> {
        if self.is_detached() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stream input disposed",
            ));
        }
        Ok(())
    }
}

impl Read for StreamInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.check_attached()?;
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).read(buf)
    }
}

impl Seek for StreamInput {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.check_attached()?;
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).seek(pos)
    }
}

impl fmt::Debug for StreamInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInput")
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

/// Media handle installed on the engine
#[derive(Clone, Debug)]
pub enum MediaHandle {
    Location(PathBuf),
    Stream(StreamInput),
}

impl MediaHandle {
    pub fn location(&self) -> Option<&Path> {
        match self {
            MediaHandle::Location(p) => Some(p),
            MediaHandle::Stream(_) => None,
        }
    }
}

/// One native player instance
pub trait MediaEngine: Send + Sync {
    fn set_media(&self, media: MediaHandle) -> EngineResult<()>;

    fn play(&self) -> EngineResult<()>;
    fn pause(&self);
    fn stop(&self);
    fn state(&self) -> EngineState;

    /// Normalized position in [0, 1]
    fn position(&self) -> f32;
    fn set_position(&self, position: f32);
    fn time_ms(&self) -> i64;
    fn length_ms(&self) -> i64;
    fn fps(&self) -> f32;

    fn set_rate(&self, rate: f32) -> EngineResult<()>;
    fn set_volume(&self, volume: i32) -> EngineResult<()>;
    fn set_mute(&self, mute: bool);
    fn next_frame(&self);

    /// Request an asynchronous snapshot. Completion arrives as
    /// [`EngineEvent::SnapshotTaken`].
    fn take_snapshot(&self, output: u32, path: &Path, width: u32, height: u32) -> EngineResult<()>;

    /// Pixel size of video output `output`, or None if not yet known
    fn video_size(&self, output: u32) -> Option<(u32, u32)>;
    fn tracks(&self) -> Vec<MediaTrack>;
    fn audio_track_descriptions(&self) -> Vec<TrackDescriptor>;
    fn video_track_descriptions(&self) -> Vec<TrackDescriptor>;
    /// Selected video track id, or None when video is disabled/absent
    fn video_track(&self) -> Option<i32>;
    fn set_audio_track(&self, id: i32) -> EngineResult<()>;
    fn set_video_track(&self, id: i32) -> EngineResult<()>;

    fn subscribe(&self, kind: EngineEventKind, handler: EngineHandler) -> EngineSubscription;
    fn unsubscribe(&self, subscription: EngineSubscription);

    /// Tear down the native player
    fn release(&self) -> EngineResult<()>;
}

/// Process-wide native decode library
pub trait EngineLibrary: Send + Sync {
    /// Bring the native library up with `args`. Repeated calls with the
    /// same flags are no-ops.
    fn init(&self, args: &[String]) -> EngineResult<()>;
    fn create_engine(&self, surface: SurfaceHandle) -> EngineResult<Arc<dyn MediaEngine>>;
    fn set_log_handler(&self, handler: Option<EngineLogHandler>);
    fn release(&self) -> EngineResult<()>;
}

/// Inter-process byte-stream channel
pub trait StreamTransport: Send {
    fn connect(&mut self, id: &str) -> EngineResult<()>;
    fn open_stream(&mut self, locator: &str) -> EngineResult<Box<dyn ByteStream>>;
    fn disconnect(&mut self) -> EngineResult<()>;
    /// Release the client. Called last during session disposal.
    fn close(&mut self) -> EngineResult<()> {
        self.disconnect()
    }
}
