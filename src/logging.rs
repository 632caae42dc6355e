//! Logging and tracing configuration for FFX-Carve
//!
//! The engine logs through `tracing` macros; embedding applications either
//! install their own subscriber or call [`init`] once at startup.
//!
//! # Environment Variable Control
//!
//! Set `RUST_LOG` to control log levels at runtime:
//! ```bash
//! RUST_LOG=debug carve-tool                       # All debug logs
//! RUST_LOG=ffx_carve::scanner=trace carve-tool    # Scanner step-by-step
//! RUST_LOG=ffx_carve::cache=debug carve-tool      # Cache hits/misses
//! ```
//!
//! Levels used by the engine:
//!
//! - `error` - detector contract violations (no forward progress)
//! - `warn`  - skipped detectors, lenient consistency mismatches
//! - `info`  - scan start/finish per input
//! - `debug` - overlap discards, codec stream verdicts, evictions
//! - `trace` - per-step detector selection, buffer refills

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn default_filter() -> EnvFilter {
    if cfg!(debug_assertions) || cfg!(feature = "debug-logging") {
        EnvFilter::new("ffx_carve=debug")
    } else {
        EnvFilter::new("ffx_carve=info")
    }
}

/// Initialize the logging/tracing system
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize logging with file:line and thread IDs, everything at trace
pub fn init_verbose() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .pretty(),
    );

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Check if debug logging is enabled
/// Used to skip hex previews and other costly log formatting
#[inline]
pub fn is_debug_enabled() -> bool {
    tracing::enabled!(Level::DEBUG)
}

/// Hex preview of at most `max` leading bytes, for log fields
pub fn hex_preview(bytes: &[u8], max: usize) -> String {
    let shown = &bytes[..bytes.len().min(max)];
    if shown.len() < bytes.len() {
        format!("{}..", hex::encode(shown))
    } else {
        hex::encode(shown)
    }
}
