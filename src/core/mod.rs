//! Playback controller core - session, coordinators, events, workers
//!
//! These modules only talk to the engine through the traits in
//! [`crate::engine`].

pub mod buffering;
pub mod event_bus;
pub mod geometry;
mod normalizer;
pub mod player;
pub mod player_events;
pub mod runtime;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod wait;
pub mod workers;

// Re-exports for convenience
pub use buffering::{BufferingOutcome, BufferingSynchronizer};
pub use event_bus::EventBus;
pub use geometry::{GeometryResolver, VideoGeometry};
pub use player::{Session, SessionOptions};
pub use snapshot::SnapshotCoordinator;
pub use source::{MediaSource, SourceResolver, StreamType};
pub use state::{PlaybackRange, SessionState};
pub use workers::Workers;
