//! Diagnostic tracing for lockgate.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Command reports
//! (conflict lists, prune candidates, status tables) are printed directly and
//! are unaffected by the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=lockgate=debug lockgate pr --title "chore: bump" --test "cargo test"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
