use crate::config::Config;
use crate::sink::BroadcastSink;
use anyhow::{Context, Result};
use capture::{CaptureFormat, DeviceProvider, MjpegConnector, SourceRegistry, SyntheticDevices};
use controller::{
    DetectionLoop, LoopConfig, MetricsSampler, Pacing, RenderSink, ResourceSource, SamplerConfig,
};
use inference::{InferenceRuntime, ModelCatalog, ModelRegistry};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, warn};

const FRAME_QUEUE: usize = 4;

#[derive(Clone)]
pub struct AppState {
    pub sources: Arc<SourceRegistry>,
    pub models: Arc<ModelRegistry>,
    pub metrics: Arc<MetricsSampler>,
    pub frames: BroadcastSink,
    loop_config: LoopConfig,
    detection_loop: Arc<RwLock<Arc<DetectionLoop>>>,
}

impl AppState {
    pub fn new(
        sources: Arc<SourceRegistry>,
        models: Arc<ModelRegistry>,
        sampler: SamplerConfig,
        loop_config: LoopConfig,
    ) -> Self {
        let metrics = Arc::new(MetricsSampler::new(
            sampler,
            Arc::clone(&models) as Arc<dyn ResourceSource>,
        ));
        let frames = BroadcastSink::new(FRAME_QUEUE);
        let detection_loop = Arc::new(RwLock::new(Arc::new(new_loop(
            &sources,
            &models,
            &metrics,
            &frames,
            &loop_config,
        ))));

        Self {
            sources,
            models,
            metrics,
            frames,
            loop_config,
            detection_loop,
        }
    }

    /// Wire registries from configuration, discover cameras, register the
    /// configured remote streams and load the default model if one is set.
    pub async fn build(config: &Config) -> Result<Self> {
        let format = CaptureFormat {
            width: config.frame_width,
            height: config.frame_height,
            fps: config.frame_fps,
        };
        let sources = Arc::new(SourceRegistry::new(
            device_provider(config),
            Arc::new(MjpegConnector::default()),
            format,
        ));
        let models = Arc::new(ModelRegistry::new(
            ModelCatalog::default(),
            select_runtime(config)?,
        ));

        let state = Self::new(
            sources,
            models,
            SamplerConfig {
                window: config.fps_window,
                interval: Duration::from_millis(config.metrics_interval_ms),
            },
            LoopConfig {
                pacing: Pacing::from_refresh_hz(config.refresh_hz),
            },
        );

        match state.sources.discover_local_sources().await {
            Ok(found) => info!(count = found.len(), "Local cameras discovered"),
            Err(e) => warn!(error = %e, "Local camera discovery failed"),
        }

        for remote in &config.remote_sources {
            state
                .sources
                .register_remote_source(remote.kind, &remote.url, remote.name.clone())
                .with_context(|| format!("register remote source {}", remote.url))?;
        }

        if let Some(id) = &config.default_model {
            state
                .models
                .load_model(id)
                .await
                .with_context(|| format!("load default model {id}"))?;
        }

        Ok(state)
    }

    pub fn detection_loop(&self) -> Arc<DetectionLoop> {
        Arc::clone(
            &self
                .detection_loop
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// The current loop, replaced by a fresh `Idle` one if it has stopped.
    pub fn startable_loop(&self) -> Arc<DetectionLoop> {
        let mut current = self
            .detection_loop
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.state().is_terminal() {
            info!("Replacing stopped detection loop");
            *current = Arc::new(new_loop(
                &self.sources,
                &self.models,
                &self.metrics,
                &self.frames,
                &self.loop_config,
            ));
        }
        Arc::clone(&current)
    }

    /// Stop the loop, close the source and dispose the model.
    pub async fn shutdown(&self) {
        self.detection_loop().stop().await;
        self.sources.close().await;
        self.models.dispose().await;
        info!("Gateway resources released");
    }
}

fn new_loop(
    sources: &Arc<SourceRegistry>,
    models: &Arc<ModelRegistry>,
    metrics: &Arc<MetricsSampler>,
    frames: &BroadcastSink,
    config: &LoopConfig,
) -> DetectionLoop {
    DetectionLoop::new(
        Arc::clone(sources),
        Arc::clone(models),
        Arc::new(frames.clone()) as Arc<dyn RenderSink>,
        Arc::clone(metrics),
        config.clone(),
    )
}

#[cfg(feature = "v4l2")]
fn device_provider(config: &Config) -> Arc<dyn DeviceProvider> {
    if config.synthetic_cameras > 0 {
        return Arc::new(SyntheticDevices::new(config.synthetic_cameras));
    }
    Arc::new(capture::V4lDevices)
}

#[cfg(not(feature = "v4l2"))]
fn device_provider(config: &Config) -> Arc<dyn DeviceProvider> {
    Arc::new(SyntheticDevices::new(config.synthetic_cameras))
}

#[cfg(feature = "ort-backend")]
fn select_runtime(config: &Config) -> Result<Arc<dyn InferenceRuntime>> {
    let runtime = inference::OrtRuntime::new(inference::OrtConfig {
        model_dir: config.model_dir.clone().into(),
        ..Default::default()
    })
    .context("initialize ONNX Runtime")?;
    info!(device = runtime.device().as_str(), "ONNX Runtime backend selected");
    Ok(Arc::new(runtime))
}

#[cfg(not(feature = "ort-backend"))]
fn select_runtime(config: &Config) -> Result<Arc<dyn InferenceRuntime>> {
    info!(
        model_dir = %config.model_dir,
        "No accelerator backend compiled in, using stub runtime"
    );
    Ok(Arc::new(inference::StubRuntime::default()))
}
