use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `fmt` subscriber, filtered by `RUST_LOG`.
///
/// Falls back to `default_directive` when `RUST_LOG` is unset. Safe to call
/// more than once; later calls are ignored.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
