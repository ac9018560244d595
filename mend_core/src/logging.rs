//! Tracing setup for the mend binaries.
//!
//! Events go to stderr. Stdout is reserved for command output such as JSON
//! listings and exports, so it stays machine-readable.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging with a default filter directive.
///
/// RUST_LOG still takes precedence when it is set.
pub fn init_with_level(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

/// Filter directive for a `-v` count: none is info, `-v` debug, `-vv` trace
pub fn verbosity_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("debug"))
        .try_init();
}
