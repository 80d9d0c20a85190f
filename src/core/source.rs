//! Media source resolution.
//!
//! A load names its bytes either by local path or by a locator the stream
//! transport understands. Either way the engine gets one [`MediaHandle`].
//! At most one transport stream is held per session; it is disposed before a
//! replacement is opened and again when the session goes away.

use std::path::PathBuf;

use log::{debug, warn};

use crate::engine::{MediaHandle, StreamInput, StreamTransport};
use crate::error::{PlayerError, Result};

/// Where `load_media` reads bytes from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamType {
    /// Path directly readable by the engine
    File,
    /// Locator resolved through the stream transport
    LocalFileStream,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaSource {
    LocalFile(PathBuf),
    LocalStream(String),
}

impl MediaSource {
    pub fn new(stream_type: StreamType, locator: &str) -> Self {
        match stream_type {
            StreamType::File => MediaSource::LocalFile(PathBuf::from(locator)),
            StreamType::LocalFileStream => MediaSource::LocalStream(locator.to_string()),
        }
    }
}

/// Owns the active transport stream, if any
#[derive(Debug, Default)]
pub struct SourceResolver {
    active: Option<StreamInput>,
}

impl SourceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `source` into a handle for the engine.
    ///
    /// Any previously held stream is released first, so a failed open leaves
    /// no stream installed.
    pub fn resolve(&mut self, source: &MediaSource, transport: &mut dyn StreamTransport) -> Result<MediaHandle> {
        self.release();
        match source {
            MediaSource::LocalFile(path) => {
                debug!("Resolving local file {}", path.display());
                Ok(MediaHandle::Location(path.clone()))
            }
            MediaSource::LocalStream(locator) => {
                let stream = transport
                    .open_stream(locator)
                    .map_err(|source| PlayerError::SourceUnavailable {
                        locator: locator.clone(),
                        source,
                    })?;
                debug!("Opened transport stream for {}", locator);
                let input = StreamInput::new(stream);
                self.active = Some(input.clone());
                Ok(MediaHandle::Stream(input))
            }
        }
    }

    pub fn has_active_stream(&self) -> bool {
        self.active.is_some()
    }

    /// Dispose input then backing stream. Failures are logged, not returned.
    pub fn release(&mut self) {
        if let Some(input) = self.active.take() {
            input.detach();
            if let Err(e) = input.close() {
                warn!("Failed to close transport stream: {}", e);
            }
        }
    }
}

impl Drop for SourceResolver {
    fn drop(&mut self) {
        self.release();
    }
}
