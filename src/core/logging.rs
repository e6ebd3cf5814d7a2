//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=helixcloud::streaming=debug` for per-chunk ingestion stats.
///
/// # Example
/// ```
/// helixcloud::core::logging::init();
/// log::info!("Engine started");
/// ```
pub fn init() {
    // may be called more than once (tests, embedding hosts)
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
