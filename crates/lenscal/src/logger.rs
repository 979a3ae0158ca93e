//! Logging setup for lenscal binaries and tests
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the executable.

use tracing::Level;

/// Initialize the tracing subscriber at INFO level
///
/// The level can be overridden through `RUST_LOG`:
/// ```bash
/// RUST_LOG=debug lenscal-project camera.cameramodel 100 200
/// RUST_LOG=lenscal::optimizer=trace lenscal-project ...
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// # Example
/// ```no_run
/// use lenscal::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("per-iteration optimizer output enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    // A subscriber may already be installed (tests, embedding applications)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}
