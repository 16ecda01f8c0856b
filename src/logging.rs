//! Development-time tracing for debugging the orchestrator.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`, or by the
//! coarser `AGENTIC_VERBOSE` switch when `RUST_LOG` is unset. Product output
//! (graph listings, staged diffs, apply reports) is plain stdout and is never
//! routed through tracing.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `AGENTIC_VERBOSE=1` selects `debug`,
/// and the default is `warn`.
pub fn init() {
    let fallback = if std::env::var_os("AGENTIC_VERBOSE").is_some() {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
