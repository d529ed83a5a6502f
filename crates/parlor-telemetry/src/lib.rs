pub mod metrics;

use parlor_settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter {directives:?}: {detail}")]
    Filter { directives: String, detail: String },

    #[error("subscriber already installed: {0}")]
    AlreadyInstalled(String),

    #[error("metrics recorder: {0}")]
    Metrics(String),
}

/// Build the filter directive string from settings, e.g. `info,parlor_hub=debug`.
pub fn filter_directives(settings: &LoggingSettings) -> String {
    let mut directives = settings.level.to_lowercase();
    for (module, level) in &settings.module_levels {
        directives.push_str(&format!(",{}={}", module, level.to_lowercase()));
    }
    directives
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// `RUST_LOG` takes precedence over the configured level and module overrides.
pub fn init_telemetry(settings: &LoggingSettings) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directives = filter_directives(settings);
            EnvFilter::try_new(&directives).map_err(|e| TelemetryError::Filter {
                directives,
                detail: e.to_string(),
            })?
        }
    };

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))
}
