use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LogConfig;

/// Initialize tracing with a stdout layer.
///
/// - Compact human-readable output by default, JSON lines when `log.json` is set
/// - Default level: INFO (DEBUG for this crate), override via RUST_LOG env
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(config: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hostlift_lib=debug"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(true)
                    .with_line_number(true)
                    .compact(),
            )
            .try_init()
    };

    if result.is_ok() {
        tracing::debug!("Tracing initialized");
    }
}
