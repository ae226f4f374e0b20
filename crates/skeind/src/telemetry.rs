//! Tracing initialisation for the daemon.
//!
//! Human-readable logs on stdout, gated by an [`EnvFilter`]. `RUST_LOG`
//! takes precedence over the configured level, so per-crate directives such
//! as `skein_net=debug` work without editing the config file.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Call once, before any event is emitted.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
