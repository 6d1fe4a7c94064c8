//! Tracing initialization for hosts and examples.
//!
//! The library itself only emits `tracing` events (and `log` records in the
//! database layer); hosts call [`init`] once to install a subscriber and the
//! log-to-tracing bridge.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set.
const DEFAULT_FILTER: &str = "info,candex=debug";

/// Installs a fmt subscriber with env-filter support plus the `log` bridge.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init() {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
