//! Synchronous buffering checkpoint.
//!
//! The engine only buffers while its pipeline runs, but `load_media` must
//! return with the session ready to seek. So: play, wait for 100% buffering
//! (bounded), then pause. Running out of time is not a failure; the media may
//! still be playable and the load carries on best-effort.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::core::wait::{Completion, ScopedSubscription, WaitOutcome};
use crate::engine::{EngineEvent, EngineEventKind, EngineResult, MediaEngine};

pub const DEFAULT_BUFFERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Buffering percentage the engine reports when fully ready
const BUFFERING_COMPLETE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferingOutcome {
    Ready,
    /// Timeout elapsed first; playback proceeds best-effort
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct BufferingSynchronizer {
    timeout: Duration,
}

impl Default for BufferingSynchronizer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFERING_TIMEOUT)
    }
}

impl BufferingSynchronizer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Play until buffered or timed out, then pause.
    ///
    /// Only an engine refusal to start playback is an error.
    pub fn run(&self, engine: &dyn MediaEngine) -> EngineResult<BufferingOutcome> {
        let ready = Completion::new();
        let signal = ready.clone();
        let started = Instant::now();

        let outcome = {
            let _sub = ScopedSubscription::new(
                engine,
                EngineEventKind::Buffering,
                Arc::new(move |event: &EngineEvent| {
                    if let EngineEvent::Buffering(percent) = event
                        && *percent >= BUFFERING_COMPLETE
                    {
                        signal.signal();
                    }
                }),
            );

            engine.play()?;
            ready.wait_timeout(self.timeout)
        };

        engine.pause();

        match outcome {
            WaitOutcome::Signalled => {
                debug!("Buffering complete in {:?}", started.elapsed());
                Ok(BufferingOutcome::Ready)
            }
            WaitOutcome::TimedOut => {
                warn!(
                    "Buffering did not complete within {:?}, continuing best-effort",
                    self.timeout
                );
                Ok(BufferingOutcome::TimedOut)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineState, MediaHandle};
    use crate::sim::{SimEngine, SimMedia};
    use std::path::PathBuf;

    fn loaded(profile: SimMedia) -> Arc<SimEngine> {
        let engine = SimEngine::new(profile).unwrap();
        engine
            .set_media(MediaHandle::Location(PathBuf::from("clip.mp4")))
            .unwrap();
        engine
    }

    #[test]
    fn test_ready_then_paused() {
        let engine = loaded(SimMedia::video(320, 240));
        let sync = BufferingSynchronizer::new(Duration::from_secs(2));

        let outcome = sync.run(&*engine).unwrap();
        assert_eq!(outcome, BufferingOutcome::Ready);
        assert_eq!(engine.state(), EngineState::Paused);
        assert_eq!(engine.subscription_count(), 0);
    }

    #[test]
    fn test_timeout_is_best_effort() {
        let engine = loaded(SimMedia::video(320, 240).with_buffering(false));
        let sync = BufferingSynchronizer::new(Duration::from_millis(50));

        let start = Instant::now();
        let outcome = sync.run(&*engine).unwrap();
        assert_eq!(outcome, BufferingOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(engine.state(), EngineState::Paused);
        assert_eq!(engine.subscription_count(), 0);
    }

    #[test]
    fn test_play_failure_unsubscribes() {
        // No media installed: play is refused
        let engine = SimEngine::new(SimMedia::video(320, 240)).unwrap();
        let sync = BufferingSynchronizer::default();

        assert!(sync.run(&*engine).is_err());
        assert_eq!(engine.subscription_count(), 0);
    }
}
