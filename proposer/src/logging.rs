//! Diagnostic tracing for pipeline runs.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. Run artifacts
//! (`state.json`, iteration logs, `proposal.md`) are written by `session`
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; defaults to `proposer=info` so phase and iteration
/// boundaries are visible without configuration.
///
/// ```bash
/// RUST_LOG=proposer=debug proposer run
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("proposer=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
