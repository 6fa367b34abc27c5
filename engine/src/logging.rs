//! `tracing` subscriber bootstrap, shared by the CLI and any embedder.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global `tracing` subscriber. Honors `RUST_LOG`; falls back to
/// `info` for this crate and `warn` for everything else. Safe to call more
/// than once — a second call is a no-op rather than a panic.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,engine=info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
