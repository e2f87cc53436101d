//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `info`. Calling this
/// when a subscriber is already installed is a no-op, so tests and embedding
/// applications can both call it unconditionally.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
