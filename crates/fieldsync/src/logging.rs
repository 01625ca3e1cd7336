//! Log output setup for embedding apps.
//!
//! The crate logs through both `log` macros and `tracing` spans. This
//! installs one `tracing` subscriber and bridges `log` records into it.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable holding an `EnvFilter` directive, e.g. `fieldsync=debug`.
pub const LOG_ENV_VAR: &str = "FIELDSYNC_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single lines.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

static INIT: Once = Once::new();

/// Installs the global subscriber. Later calls are no-ops.
///
/// `default_filter` applies when [`LOG_ENV_VAR`] is unset or invalid.
/// Returns `false` if another subscriber or logger was already installed.
pub fn init_logging(format: LogFormat, default_filter: &str) -> bool {
    let mut installed = false;
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        let result = match format {
            LogFormat::Compact => tracing::subscriber::set_global_default(
                Registry::default()
                    .with(filter)
                    .with(fmt::layer().compact().with_target(true)),
            ),
            LogFormat::Json => tracing::subscriber::set_global_default(
                Registry::default()
                    .with(filter)
                    .with(fmt::layer().json().with_current_span(true)),
            ),
        };
        if result.is_err() {
            return;
        }

        installed = tracing_log::LogTracer::init().is_ok();
    });
    installed
}
