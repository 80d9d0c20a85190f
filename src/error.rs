use thiserror::Error;

use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum PlayerError {
    /// `core::runtime::init` was not called before creating a session
    #[error("engine runtime not initialized")]
    NotInitialized,

    /// Stream transport could not supply bytes for the locator
    #[error("source unavailable: {locator}")]
    SourceUnavailable {
        locator: String,
        #[source]
        source: EngineError,
    },

    #[error("invalid playback range: start {start}, stop {stop}")]
    InvalidRange { start: f32, stop: f32 },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("stream transport error: {0}")]
    Transport(String),

    #[error("failed to start session workers")]
    Workers(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
