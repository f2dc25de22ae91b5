//! Tracing/logging bootstrap, shared by every binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LOG_ENV_VAR};

/// Initialize the global tracing subscriber.
///
/// Filter directive comes from the `SWIFTTRACK_LOG` environment variable,
/// falling back to `config.log_level`, falling back to `"info"`. In
/// `production` the format layer emits JSON instead of human-readable text.
pub fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(config.log_level.clone())
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.is_production() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
