//! Process-wide engine bootstrap.
//!
//! Native decode libraries want one-time global setup before any player is
//! created. Call [`init`] once at startup; later calls are no-ops and return
//! the options from the first call. Every session hands these flags to its
//! [`EngineLibrary`](crate::engine::EngineLibrary) before creating an engine.

use std::sync::OnceLock;

use log::info;

/// Default engine flags: headless, quiet, no overlays or auto-loaded extras
pub const DEFAULT_ENGINE_ARGS: &[&str] = &[
    "--no-video-title-show",
    "--no-stats",
    "--no-sub-autodetect-file",
    "--no-snapshot-preview",
    "--intf",
    "dummy",
    "--no-spu",
    "--no-osd",
    "--no-lua",
    "--quiet-synchro",
    "-v",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Flags passed to the native library when it is created
    pub engine_args: Vec<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            engine_args: DEFAULT_ENGINE_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

static RUNTIME: OnceLock<RuntimeOptions> = OnceLock::new();

/// Initialize the engine runtime. Idempotent.
pub fn init(options: RuntimeOptions) -> &'static RuntimeOptions {
    RUNTIME.get_or_init(|| {
        info!("Engine runtime initialized ({} args)", options.engine_args.len());
        options
    })
}

/// Options from the first [`init`] call, None before it
pub fn options() -> Option<&'static RuntimeOptions> {
    RUNTIME.get()
}
