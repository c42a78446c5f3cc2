//! Log output for the `regview` binary.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::{SubscriberInitExt as _, TryInitError};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// Logs at `info`, or `debug` when verbose. `RUST_LOG` overrides both.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let level = if config.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        builder.json().finish().try_init()
    } else {
        builder.finish().try_init()
    }
}
