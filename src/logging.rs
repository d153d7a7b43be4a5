//! Structured logging.
//!
//! Everything in the crate logs through `tracing`. Binaries and tests pick
//! the subscriber; the filter comes from `RUST_LOG` when it is set.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a `fmt` subscriber with an env filter.
///
/// `default_filter` is used when `RUST_LOG` is unset or invalid.
/// Fails if a global subscriber was already installed.
pub fn init(default_filter: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

/// Install a test-friendly subscriber, ignoring repeated calls.
pub fn try_init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "tlsmux=warn".into()))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
