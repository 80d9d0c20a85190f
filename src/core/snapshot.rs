//! Bounded snapshot capture.
//!
//! Request a snapshot, wait (bounded) for the engine's completion callback,
//! and if the callback never shows up check whether the file was written
//! anyway. Some engines finish the write before, or instead of, signalling.
//!
//! The filesystem fallback only counts a file that is new or changed since
//! the request, so a leftover from an earlier capture at the same path is
//! not reported as success.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::{debug, warn};

use crate::core::wait::{Completion, ScopedSubscription, WaitOutcome};
use crate::engine::{EngineEvent, EngineEventKind, MediaEngine};

pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity of a file on disk at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        meta.is_file().then(|| FileStamp {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// Whether the engine's reported path names the requested file.
///
/// Engines may report an absolute or resolved form of a relative request.
fn same_target(requested: &Path, reported: &Path) -> bool {
    if requested == reported {
        return true;
    }
    match (std::fs::canonicalize(requested), std::fs::canonicalize(reported)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// True if `after` shows a file written since `before` was taken
fn is_fresh(before: Option<FileStamp>, after: Option<FileStamp>) -> bool {
    match (before, after) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(b), Some(a)) => a != b,
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCoordinator {
    timeout: Duration,
}

impl Default for SnapshotCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_TIMEOUT)
    }
}

impl SnapshotCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Capture video output `output` to `path`. Returns whether a snapshot
    /// was produced. Never called by the engine thread.
    pub fn capture(&self, engine: &dyn MediaEngine, output: u32, width: u32, height: u32, path: &Path) -> bool {
        if engine.video_track().is_none() {
            debug!("No active video track, skipping snapshot");
            return false;
        }

        let before = FileStamp::read(path);
        let done = Completion::new();
        let outcome = {
            let signal = done.clone();
            let expected: PathBuf = path.to_path_buf();
            let _sub = ScopedSubscription::new(
                engine,
                EngineEventKind::SnapshotTaken,
                Arc::new(move |event: &EngineEvent| {
                    if let EngineEvent::SnapshotTaken(written) = event
                        && (written.as_os_str().is_empty() || same_target(&expected, written))
                    {
                        signal.signal();
                    }
                }),
            );

            if let Err(e) = engine.take_snapshot(output, path, width, height) {
                warn!("Snapshot request failed for {}: {}", path.display(), e);
                return false;
            }
            done.wait_timeout(self.timeout)
        };

        match outcome {
            WaitOutcome::Signalled => {
                debug!("Snapshot written to {}", path.display());
                true
            }
            WaitOutcome::TimedOut => {
                let fresh = is_fresh(before, FileStamp::read(path));
                if fresh {
                    debug!("Snapshot callback timed out but {} was written", path.display());
                } else {
                    warn!("Snapshot timed out after {:?}: {}", self.timeout, path.display());
                }
                fresh
            }
        }
    }
}
