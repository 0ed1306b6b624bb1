//! Log output setup. `RUST_LOG`, if set, takes precedence over the level passed in.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Fails only if a subscriber is already installed, e.g. by another test.
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .ok();
}
