use crate::config::{Environment, LogLevel};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

/// Initialize tracing subscriber with pretty formatting for development
/// and JSON formatting for production.
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// Also adds an OpenTelemetry layer that exports traces if a global tracer provider
/// has been initialized (e.g. via `TelemetryGuard::init`).
pub fn setup_logging(level: LogLevel, environment: Environment) {
    install(level, environment, tracing_opentelemetry::layer());
}

pub(crate) fn install<L>(level: LogLevel, environment: Environment, otel_layer: L)
where
    L: Layer<Layered<EnvFilter, Registry>> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer);

    match environment {
        Environment::Production => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_level(true))
                .init();
        }
        Environment::Development => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_ansi(true))
                .init();
        }
    }
}
