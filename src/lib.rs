//! playctl - range-bounded playback controller over a native media engine
//!
//! Re-exports all modules for use by the binary target and integration tests.

// Core controller (session, coordinators, events, workers)
pub mod core;

// Engine collaborator traits and the scripted engine
pub mod engine;
pub mod sim;

// App modules
pub mod cli;
pub mod config;
pub mod error;

// Re-export commonly used types from core
pub use crate::core::event_bus::{downcast_event, BoxedEvent, EventBus, SubscriptionId};
pub use crate::core::player::{Session, SessionOptions};
pub use crate::core::player_events::{
    EndReached, LengthChanged, Muted, Paused, Playing, TimeChanged, Unmuted, VideoInfoChanged,
    VolumeChanged,
};
pub use crate::core::runtime::RuntimeOptions;
pub use crate::core::source::StreamType;
pub use crate::core::state::PlaybackRange;

pub use engine::{EngineLibrary, MediaEngine, StreamTransport, SurfaceHandle, TrackDescriptor};
pub use error::{PlayerError, Result};
