use capture::SourceKind;
use common::{Environment, LogLevel};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSourceConfig {
    pub kind: SourceKind,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub log_level: LogLevel,
    pub environment: Environment,
    pub bind_addr: String,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    pub refresh_hz: f64,
    pub fps_window: usize,
    pub metrics_interval_ms: u64,
    pub model_dir: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_fps: u32,
    pub synthetic_cameras: usize,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub remote_sources: Vec<RemoteSourceConfig>,
}

fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    config::Config::builder()
        .set_default("log_level", "info")?
        .set_default("environment", "development")?
        .set_default("bind_addr", "0.0.0.0:8080")?
        .set_default("refresh_hz", 30.0)?
        .set_default("fps_window", 30)?
        .set_default("metrics_interval_ms", 1000)?
        .set_default("model_dir", "models")?
        .set_default("frame_width", 640)?
        .set_default("frame_height", 480)?
        .set_default("frame_fps", 30)?
        .set_default("synthetic_cameras", 0)
}

/// Defaults, then an optional `gateway.toml`, then `GATEWAY_*` variables.
pub fn get_configuration() -> Result<Config, config::ConfigError> {
    let config = builder()?
        .add_source(config::File::with_name("gateway").required(false))
        .add_source(
            config::Environment::with_prefix("GATEWAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    config.try_deserialize::<Config>()?.validate()
}

impl Config {
    /// Reject values that would leave the loop or the sampler without a cadence.
    pub fn validate(self) -> Result<Self, config::ConfigError> {
        if !self.refresh_hz.is_finite() || self.refresh_hz <= 0.0 {
            return Err(config::ConfigError::Message(format!(
                "refresh_hz must be a positive number, got {}",
                self.refresh_hz
            )));
        }
        if self.metrics_interval_ms == 0 {
            return Err(config::ConfigError::Message(
                "metrics_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.fps_window == 0 {
            return Err(config::ConfigError::Message(
                "fps_window must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
