//! Engine callback -> public event translation.
//!
//! One engine subscription per raw event kind. Handlers run on the engine's
//! delivery thread, republish synchronously on the bus (engine order is kept)
//! and return promptly: anything that calls back into the engine's control
//! surface is handed to the session workers.

use std::sync::{Arc, Weak};

use log::{debug, error, trace};

use crate::core::player::Shared;
use crate::core::player_events::{
    EndReached, LengthChanged, Muted, Paused, Playing, TimeChanged, Unmuted, VideoInfoChanged,
    VolumeChanged,
};
use crate::engine::{EngineEvent, EngineEventKind, EngineHandler, EngineSubscription, MediaEngine};

/// Raw kinds the session listens to for its whole lifetime
const NORMALIZED_KINDS: &[EngineEventKind] = &[
    EngineEventKind::EndReached,
    EngineEventKind::TimeChanged,
    EngineEventKind::PositionChanged,
    EngineEventKind::LengthChanged,
    EngineEventKind::Playing,
    EngineEventKind::Paused,
    EngineEventKind::VolumeChanged,
    EngineEventKind::Muted,
    EngineEventKind::Unmuted,
    EngineEventKind::EncounteredError,
];

/// Subscribe the session to every normalized kind.
///
/// Handlers keep the session state alive but only a weak reference to the
/// engine, so the engine can be released while a callback is in flight.
pub(crate) fn attach(engine: &Arc<dyn MediaEngine>, shared: &Arc<Shared>) -> Vec<EngineSubscription> {
    let weak_engine: Weak<dyn MediaEngine> = Arc::downgrade(engine);
    NORMALIZED_KINDS
        .iter()
        .map(|&kind| {
            let shared = Arc::clone(shared);
            let weak_engine = weak_engine.clone();
            let handler: EngineHandler = Arc::new(move |event: &EngineEvent| {
                dispatch(&shared, &weak_engine, event);
            });
            engine.subscribe(kind, handler)
        })
        .collect()
}

fn dispatch(shared: &Shared, engine: &Weak<dyn MediaEngine>, event: &EngineEvent) {
    trace!("engine event {:?}", event);
    match event {
        EngineEvent::TimeChanged(ms) => on_time_changed(shared, engine, *ms),
        EngineEvent::PositionChanged(position) => {
            if let Some(engine) = engine.upgrade() {
                shared.watch_boundary(&engine, *position);
            }
        }
        EngineEvent::LengthChanged(ms) => {
            if *ms > 0 {
                shared.state.set_length_ms(*ms);
                shared.bus.emit(LengthChanged(*ms));
            } else {
                debug!("Ignoring non-positive length {}", ms);
            }
        }
        EngineEvent::EndReached => shared.bus.emit(EndReached),
        EngineEvent::Playing => shared.bus.emit(Playing),
        EngineEvent::Paused => shared.bus.emit(Paused),
        EngineEvent::VolumeChanged(level) => shared.bus.emit(VolumeChanged(*level)),
        EngineEvent::Muted => {
            shared.state.set_muted(true);
            shared.bus.emit(Muted);
        }
        EngineEvent::Unmuted => {
            shared.state.set_muted(false);
            shared.bus.emit(Unmuted);
        }
        // Engine owns retry semantics
        EngineEvent::EncounteredError(message) => error!("Engine error: {}", message),
        EngineEvent::Buffering(_) | EngineEvent::Stopped | EngineEvent::SnapshotTaken(_) => {}
    }
}

fn on_time_changed(shared: &Shared, engine: &Weak<dyn MediaEngine>, ms: i64) {
    // Late echoes from before a seek or step may land outside the range
    shared.state.set_current_time_ms(shared.state.clamp_time_ms(ms as f64));
    shared.bus.emit(TimeChanged(ms));

    let Some(engine) = engine.upgrade() else {
        return;
    };

    if let Some(geometry) = shared.geometry.on_time_changed(&*engine) {
        shared.bus.emit(VideoInfoChanged {
            orientation: geometry.orientation.label().to_string(),
            aspect_ratio: geometry.aspect_ratio,
        });
    }

    let length = shared.state.length_ms();
    if length > 0 {
        shared.watch_boundary(&engine, (ms as f64 / length as f64) as f32);
    }
}
