//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Build the level filter, `RUST_LOG` overriding `default_level`.
pub fn env_filter(default_level: filter::LevelFilter) -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// Logs go to stderr so that command output on stdout stays clean.
pub fn init(default_level: filter::LevelFilter) {
    let fmt_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter(default_level));

    registry().with(fmt_layer).init();
}
