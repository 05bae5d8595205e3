//! Logging setup for the daemon

/// Default directives when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "loyalty=info,loyalty_ledger=info,loyaltyd=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
/// Calling it twice is harmless; the second call is ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with_target(true)
        .try_init();
}
