pub mod alarm; // Alarm/Mute Engine: repeating playback gated by mute state
pub mod alerts; // Alert Dispatcher: one-shot notification convergence
pub mod clock;
pub mod config;
pub mod db;
pub mod scheduler; // Dose Scheduler: next-dose computation and projection

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedding applications.
///
/// Honors RUST_LOG when set, otherwise falls back to the crate default.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("GesMed core starting v{}", config::APP_VERSION);
}
