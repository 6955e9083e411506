//! Logging setup for the rowbridge binary.

use tracing_subscriber::EnvFilter;

/// Logs go to stderr so stdout carries only rows. `RUST_LOG` overrides the
/// `info` default.
pub fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
