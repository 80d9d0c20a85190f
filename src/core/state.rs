//! Session state shared between the caller's thread and engine callbacks.
//!
//! Each field has its own guard: callbacks write time/length, the caller
//! writes range/time on seek and step. No operation needs two fields to
//! change atomically together.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

use parking_lot::Mutex;

use crate::error::{PlayerError, Result};

/// Active playback window, normalized to [0, 1]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaybackRange {
    start: f32,
    stop: f32,
}

impl Default for PlaybackRange {
    fn default() -> Self {
        Self { start: 0.0, stop: 1.0 }
    }
}

impl PlaybackRange {
    /// Both bounds must be finite, inside [0, 1], and `start <= stop`.
    pub fn new(start: f32, stop: f32) -> Result<Self> {
        let valid = start.is_finite()
            && stop.is_finite()
            && (0.0..=1.0).contains(&start)
            && (0.0..=1.0).contains(&stop)
            && start <= stop;
        if !valid {
            return Err(PlayerError::InvalidRange { start, stop });
        }
        Ok(Self { start, stop })
    }

    pub fn start(&self) -> f32 {
        self.start
    }

    pub fn stop(&self) -> f32 {
        self.stop
    }

    /// Clamp into [start, stop]. NaN maps to start.
    pub fn clamp(&self, position: f32) -> f32 {
        if position.is_nan() {
            return self.start;
        }
        position.clamp(self.start, self.stop)
    }

    pub fn contains(&self, position: f32) -> bool {
        position >= self.start && position <= self.stop
    }
}

pub struct SessionState {
    range: Mutex<PlaybackRange>,
    /// Last known playback time, fractional so repeated steps don't drift
    current_time_ms: Mutex<f64>,
    length_ms: AtomicI64,
    boundary_latched: AtomicBool,
    muted: AtomicBool,
    volume: AtomicI32,
    rate: Mutex<f32>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            range: Mutex::new(PlaybackRange::default()),
            current_time_ms: Mutex::new(0.0),
            length_ms: AtomicI64::new(0),
            boundary_latched: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            volume: AtomicI32::new(100),
            rate: Mutex::new(1.0),
        }
    }
}

impl SessionState {
    // ===================
    //      Read State
    // ===================

    pub fn range(&self) -> PlaybackRange {
        *self.range.lock()
    }

    pub fn current_time_ms(&self) -> f64 {
        *self.current_time_ms.lock()
    }

    /// Media length, 0 if unknown
    pub fn length_ms(&self) -> i64 {
        self.length_ms.load(Ordering::Acquire)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn volume(&self) -> i32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn rate(&self) -> f32 {
        *self.rate.lock()
    }

    /// `ms` clamped into the active range; unchanged while the length is unknown
    pub fn clamp_time_ms(&self, ms: f64) -> f64 {
        let length = self.length_ms() as f64;
        if length <= 0.0 {
            return ms;
        }
        let range = self.range();
        ms.clamp(range.start() as f64 * length, range.stop() as f64 * length)
    }

    // ======================
    //      Write State
    // ======================

    pub(crate) fn set_range(&self, range: PlaybackRange) {
        *self.range.lock() = range;
    }

    pub(crate) fn set_current_time_ms(&self, ms: f64) {
        *self.current_time_ms.lock() = ms;
    }

    pub(crate) fn set_length_ms(&self, ms: i64) {
        self.length_ms.store(ms, Ordering::Release);
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub(crate) fn set_volume(&self, volume: i32) {
        self.volume.store(volume, Ordering::Relaxed);
    }

    pub(crate) fn set_rate(&self, rate: f32) {
        *self.rate.lock() = rate;
    }

    /// Returns true for the first caller after a reset.
    /// Keeps one boundary hit from queueing a pause per position update.
    pub(crate) fn latch_boundary(&self) -> bool {
        !self.boundary_latched.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn reset_boundary(&self) {
        self.boundary_latched.store(false, Ordering::Release);
    }

    /// Forget per-media state ahead of a new load
    pub(crate) fn reset_for_load(&self, range: PlaybackRange) {
        self.set_range(range);
        self.set_current_time_ms(0.0);
        self.set_length_ms(0);
        self.reset_boundary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(PlaybackRange::new(0.25, 0.75).is_ok());
        assert!(PlaybackRange::new(0.5, 0.5).is_ok());
        assert!(PlaybackRange::new(0.8, 0.2).is_err());
        assert!(PlaybackRange::new(-0.1, 0.5).is_err());
        assert!(PlaybackRange::new(0.0, 1.5).is_err());
        assert!(PlaybackRange::new(f32::NAN, 1.0).is_err());
    }

    #[test]
    fn test_range_clamp() {
        let range = PlaybackRange::new(0.25, 0.75).unwrap();
        assert_eq!(range.clamp(0.9), 0.75);
        assert_eq!(range.clamp(0.1), 0.25);
        assert_eq!(range.clamp(0.5), 0.5);
        assert_eq!(range.clamp(f32::NAN), 0.25);
        assert_eq!(range.clamp(f32::INFINITY), 0.75);
        assert!(range.contains(range.clamp(-3.0)));
    }

    #[test]
    fn test_boundary_latch() {
        let state = SessionState::default();
        assert!(state.latch_boundary());
        assert!(!state.latch_boundary());
        state.reset_boundary();
        assert!(state.latch_boundary());
    }

    #[test]
    fn test_clamp_time_into_range() {
        let state = SessionState::default();
        state.set_range(PlaybackRange::new(0.2, 0.6).unwrap());
        assert_eq!(state.clamp_time_ms(9_000.0), 9_000.0);

        state.set_length_ms(10_000);
        assert_eq!(state.clamp_time_ms(9_000.0), 6_000.0);
        assert_eq!(state.clamp_time_ms(100.0), 2_000.0);
        assert_eq!(state.clamp_time_ms(4_321.0), 4_321.0);
    }

    #[test]
    fn test_reset_for_load() {
        let state = SessionState::default();
        state.set_current_time_ms(1234.5);
        state.set_length_ms(10_000);
        state.latch_boundary();

        let range = PlaybackRange::new(0.1, 0.2).unwrap();
        state.reset_for_load(range);
        assert_eq!(state.range(), range);
        assert_eq!(state.current_time_ms(), 0.0);
        assert_eq!(state.length_ms(), 0);
        assert!(state.latch_boundary());
    }
}
