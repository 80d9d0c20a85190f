//! One-shot display geometry per load.
//!
//! On the first time update after a load with an active video track, compute
//! orientation and display aspect ratio from the output size and the track's
//! orientation/SAR metadata. The latch holds until the next load.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, trace};

use crate::engine::{MediaEngine, TrackKind, VideoOrientation};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VideoGeometry {
    pub orientation: VideoOrientation,
    pub aspect_ratio: f32,
}

/// Display aspect ratio for a `width` x `height` output.
///
/// Rotated orientations swap the axes. A known sample aspect ratio
/// (`sar_den != 0`) scales the result. Returns None for a degenerate size.
pub fn display_aspect_ratio(
    width: u32,
    height: u32,
    orientation: VideoOrientation,
    sar_num: u32,
    sar_den: u32,
) -> Option<f32> {
    if width == 0 || height == 0 {
        return None;
    }
    let mut ratio = if orientation.is_rotated() {
        height as f32 / width as f32
    } else {
        width as f32 / height as f32
    };
    if sar_den != 0 {
        ratio *= sar_num as f32 / sar_den as f32;
    }
    (ratio > 0.0 && ratio.is_finite()).then_some(ratio)
}

#[derive(Debug, Default)]
pub struct GeometryResolver {
    resolved: AtomicBool,
}

impl GeometryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Re-arm for a new load
    pub fn reset(&self) {
        self.resolved.store(false, Ordering::Release);
    }

    /// Try to resolve geometry on a time update.
    ///
    /// Returns Some exactly once per load. Stays unlatched while the engine
    /// cannot report an output size yet.
    pub fn on_time_changed(&self, engine: &dyn MediaEngine) -> Option<VideoGeometry> {
        if self.is_resolved() {
            return None;
        }
        let selected = engine.video_track()?;

        let Some((width, height)) = engine.video_size(0) else {
            trace!("Video size not available yet");
            return None;
        };

        let tracks = engine.tracks();
        let mut video_tracks = tracks.iter().filter_map(|t| match t.kind {
            TrackKind::Video { orientation, sar_num, sar_den } => Some((t.id, orientation, sar_num, sar_den)),
            _ => None,
        });
        // Prefer the selected track's metadata, fall back to the first video track
        let (orientation, sar_num, sar_den) = video_tracks
            .clone()
            .find(|(id, ..)| *id == selected)
            .or_else(|| video_tracks.next())
            .map(|(_, o, n, d)| (o, n, d))?;

        let aspect_ratio = display_aspect_ratio(width, height, orientation, sar_num, sar_den)?;

        // Only the first resolver wins if two updates race
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        debug!(
            "Video geometry: {}x{} {} -> {:.4}",
            width, height, orientation, aspect_ratio
        );
        Some(VideoGeometry { orientation, aspect_ratio })
    }
}
