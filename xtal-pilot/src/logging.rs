//! Development-time tracing for debugging the controller.
//!
//! Tracing is dev diagnostics via `RUST_LOG` on stderr; it is separate
//! from the per-step error logs under `pilot_files/`, which are product
//! artifacts and are always written.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber for development logging.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset. Output: stderr,
/// compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=xtal_pilot=debug cargo run -- run import /data/x_0001.cbf
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
