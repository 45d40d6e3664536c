pub mod config;
pub mod logging;
pub mod retry;
pub mod telemetry;

pub use config::{Environment, LogLevel};
pub use logging::setup_logging;
pub use retry::retry_with_backoff;
pub use telemetry::{OtlpExport, TelemetryGuard};
