//! Tracing setup for the forge CLI.
//!
//! Logs go to stderr so stdout stays reserved for the JSON reports commands print.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `forge=info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=forge=debug forge decompose --spec app.md
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forge=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
