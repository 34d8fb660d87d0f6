//! `tracing` subscriber setup for the command-line tool.
//!
//! The library itself only emits events; installing a subscriber is left to
//! the binary (or to tests that want to see the output).

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Filter directive for the configured level raised by `-v` flags.
pub fn filter_directive(config: &LoggingConfig, verbosity: u8) -> String {
    match verbosity {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// Install a global `fmt` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the configured level. Returns `false` if
/// a subscriber was already installed, which leaves the existing one in place.
pub fn init(config: &LoggingConfig, verbosity: u8) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(config, verbosity)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    result.is_ok()
}
