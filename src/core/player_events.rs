//! Public playback events.
//!
//! Published on the session's [`EventBus`](super::event_bus::EventBus) in the
//! order the engine delivered the underlying callbacks.

// === Transport state ===

#[derive(Clone, Debug, PartialEq)]
pub struct EndReached;

#[derive(Clone, Debug, PartialEq)]
pub struct Playing;

#[derive(Clone, Debug, PartialEq)]
pub struct Paused;

// === Timeline ===

/// Current playback time in milliseconds
#[derive(Clone, Debug, PartialEq)]
pub struct TimeChanged(pub i64);

/// Media length in milliseconds (always > 0)
#[derive(Clone, Debug, PartialEq)]
pub struct LengthChanged(pub i64);

// === Video ===

/// Resolved display geometry, emitted once per load
#[derive(Clone, Debug, PartialEq)]
pub struct VideoInfoChanged {
    pub orientation: String,
    pub aspect_ratio: f32,
}

// === Audio ===

#[derive(Clone, Debug, PartialEq)]
pub struct VolumeChanged(pub f32);

#[derive(Clone, Debug, PartialEq)]
pub struct Muted;

#[derive(Clone, Debug, PartialEq)]
pub struct Unmuted;
