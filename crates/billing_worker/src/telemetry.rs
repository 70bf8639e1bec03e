//! Tracing subscriber setup for the worker binary

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Builds the log filter: `RUST_LOG` wins, then `log_level`, then `info`
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber, with JSON lines when `json` is set
///
/// # Arguments
///
/// * `log_level` - The minimum log level to output (trace, debug, info, warn, error)
/// * `json` - Emit one JSON object per event
pub fn init_tracing(log_level: &str, json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter(log_level));
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
