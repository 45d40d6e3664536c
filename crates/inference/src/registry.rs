use crate::backend::ModelBackend;
use crate::catalog::{ModelCatalog, ModelDescriptor};
use crate::error::InferenceError;
use crate::runtime::{Device, InferenceRuntime, MemoryStats};
use schema::{Detection, Frame};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{Instrument, info, info_span, warn};

/// Owns the single loaded model.
///
/// The active slot sits behind an async mutex that is held across
/// dispose-then-load and across each `detect`, so loads queue in arrival
/// order and an inference never observes a half-swapped model.
pub struct ModelRegistry {
    catalog: ModelCatalog,
    runtime: Arc<dyn InferenceRuntime>,
    active: Mutex<Option<ModelBackend>>,
    current: RwLock<Option<ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn new(catalog: ModelCatalog, runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self {
            catalog,
            runtime,
            active: Mutex::new(None),
            current: RwLock::new(None),
        }
    }

    pub fn list_models(&self) -> &[ModelDescriptor] {
        self.catalog.entries()
    }

    pub fn current_model(&self) -> Option<ModelDescriptor> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_current(&self, descriptor: Option<ModelDescriptor>) {
        match self.current.write() {
            Ok(mut guard) => *guard = descriptor,
            Err(poisoned) => *poisoned.into_inner() = descriptor,
        }
    }

    /// Dispose the current model, then load `id`.
    ///
    /// On failure the slot stays empty; the previous model is not restored.
    pub async fn load_model(&self, id: &str) -> Result<ModelDescriptor, InferenceError> {
        let descriptor = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| InferenceError::UnknownModel(id.to_string()))?;

        let span = info_span!("load_model", model = %descriptor.id, runtime = self.runtime.name());
        async {
            let mut active = self.active.lock().await;

            if let Some(mut previous) = active.take() {
                info!(previous = %previous.descriptor().id, "Disposing previous model");
                previous.dispose();
                self.set_current(None);
            }

            let mut backend = ModelBackend::for_descriptor(descriptor.clone(), Arc::clone(&self.runtime));
            if let Err(e) = backend.load().await {
                warn!(error = %e, "Model load failed, no model active");
                return Err(e);
            }

            *active = Some(backend);
            self.set_current(Some(descriptor.clone()));

            let memory = self.runtime.memory();
            info!(
                device = self.runtime.device().as_str(),
                memory_mb = memory.megabytes(),
                "Model ready"
            );
            Ok(descriptor)
        }
        .instrument(span)
        .await
    }

    /// Run the active model on `frame`.
    pub async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let active = self.active.lock().await;
        match active.as_ref() {
            Some(backend) => backend.detect(frame).await,
            None => Err(InferenceError::NoModelLoaded),
        }
    }

    /// Release the active model, if any.
    pub async fn dispose(&self) {
        let mut active = self.active.lock().await;
        if let Some(mut backend) = active.take() {
            info!(model = %backend.descriptor().id, "Disposing model");
            backend.dispose();
        }
        self.set_current(None);
    }

    pub fn memory(&self) -> MemoryStats {
        self.runtime.memory()
    }

    pub fn device(&self) -> Device {
        self.runtime.device()
    }

    pub fn gpu_utilization(&self) -> Option<f32> {
        self.runtime.gpu_utilization()
    }
}
