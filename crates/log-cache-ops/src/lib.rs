//! Ambient logging setup shared by the node binary and its integration
//! tests: a `tracing_subscriber::FmtSubscriber` with `EnvFilter`, behind a
//! single entry point so every caller gets the same defaults.

/// Installs a process-global `tracing` subscriber that writes structured
/// logs to stderr, honoring `RUST_LOG` (or `LOG_LEVEL` if `RUST_LOG` is
/// unset) for verbosity.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(!matches!(std::env::var("NO_COLOR"), Ok(v) if v == "1"))
        .finish();

    // A second call to set_global_default returns an error rather than
    // panicking elsewhere in the process; that's fine for tests that each
    // try to install their own subscriber.
    let _ = tracing::subscriber::set_global_default(subscriber);
}
