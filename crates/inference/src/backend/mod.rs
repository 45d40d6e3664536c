//! One backend per model family behind a shared `load`/`detect`/`dispose`
//! contract. The registry picks the variant from the descriptor category.

use crate::catalog::{ModelCategory, ModelDescriptor};
use crate::error::InferenceError;
use crate::runtime::{CompiledModel, InferenceRuntime, RawOutput};
use schema::{Detection, Frame};
use serde::Serialize;
use std::sync::Arc;

mod classifier;
mod detector;
mod face;

pub use classifier::ClassifierBackend;
pub use detector::ObjectDetectorBackend;
pub use face::FaceDetectorBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Unloaded,
    Ready,
    Disposed,
}

/// Compiled weights plus the lifecycle bookkeeping every family shares.
pub(crate) struct ModelSlot {
    descriptor: ModelDescriptor,
    runtime: Arc<dyn InferenceRuntime>,
    model: Option<Box<dyn CompiledModel>>,
    state: BackendState,
}

impl ModelSlot {
    pub(crate) fn new(descriptor: ModelDescriptor, runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self {
            descriptor,
            runtime,
            model: None,
            state: BackendState::Unloaded,
        }
    }

    async fn load(&mut self) -> Result<(), InferenceError> {
        if self.state == BackendState::Ready {
            return Ok(());
        }

        let model = self
            .runtime
            .compile(&self.descriptor)
            .await
            .map_err(|e| InferenceError::load(&self.descriptor.id, &e))?;

        self.model = Some(model);
        self.state = BackendState::Ready;
        Ok(())
    }

    async fn infer(&self, frame: &Frame) -> Result<RawOutput, InferenceError> {
        let model = match (&self.model, self.state) {
            (Some(model), BackendState::Ready) => model,
            (_, BackendState::Disposed) => {
                return Err(InferenceError::Detection(format!(
                    "{} has been disposed",
                    self.descriptor.id
                )));
            }
            _ => {
                return Err(InferenceError::Detection(format!(
                    "{} is not loaded",
                    self.descriptor.id
                )));
            }
        };

        model
            .infer(frame)
            .await
            .map_err(|e| InferenceError::Detection(format!("{e:#}")))
    }

    fn dispose(&mut self) {
        if self.state == BackendState::Disposed {
            return;
        }
        // Dropping the compiled model releases its accelerator allocation.
        self.model = None;
        self.state = BackendState::Disposed;
    }
}

/// A loaded or loadable model of one of the supported families.
pub enum ModelBackend {
    ObjectDetector(ObjectDetectorBackend),
    Classifier(ClassifierBackend),
    FaceDetector(FaceDetectorBackend),
}

impl ModelBackend {
    /// Pick the backend variant for the descriptor's category.
    pub fn for_descriptor(descriptor: ModelDescriptor, runtime: Arc<dyn InferenceRuntime>) -> Self {
        match descriptor.category {
            ModelCategory::ObjectDetection => {
                Self::ObjectDetector(ObjectDetectorBackend::new(descriptor, runtime))
            }
            ModelCategory::Classification => {
                Self::Classifier(ClassifierBackend::new(descriptor, runtime))
            }
            ModelCategory::FaceDetection => {
                Self::FaceDetector(FaceDetectorBackend::new(descriptor, runtime))
            }
        }
    }

    fn slot(&self) -> &ModelSlot {
        match self {
            Self::ObjectDetector(b) => &b.slot,
            Self::Classifier(b) => &b.slot,
            Self::FaceDetector(b) => &b.slot,
        }
    }

    fn slot_mut(&mut self) -> &mut ModelSlot {
        match self {
            Self::ObjectDetector(b) => &mut b.slot,
            Self::Classifier(b) => &mut b.slot,
            Self::FaceDetector(b) => &mut b.slot,
        }
    }

    /// Fetch and compile the weights. Calling it again after `dispose` reloads.
    pub async fn load(&mut self) -> Result<(), InferenceError> {
        self.slot_mut().load().await
    }

    pub async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        match self {
            Self::ObjectDetector(b) => b.detect(frame).await,
            Self::Classifier(b) => b.detect(frame).await,
            Self::FaceDetector(b) => b.detect(frame).await,
        }
    }

    /// Release accelerator memory. No-op after the first call.
    pub fn dispose(&mut self) {
        self.slot_mut().dispose();
    }

    pub fn state(&self) -> BackendState {
        self.slot().state
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.slot().descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use crate::runtime::StubRuntime;
    use schema::BoundingBox;

    fn backend(id: &str, runtime: &StubRuntime) -> ModelBackend {
        let descriptor = ModelCatalog::default().get(id).unwrap().clone();
        ModelBackend::for_descriptor(descriptor, Arc::new(runtime.clone()))
    }

    #[test]
    fn category_selects_variant() {
        let runtime = StubRuntime::default();
        assert!(matches!(backend("coco-ssd", &runtime), ModelBackend::ObjectDetector(_)));
        assert!(matches!(backend("mobilenet", &runtime), ModelBackend::Classifier(_)));
        assert!(matches!(backend("blazeface", &runtime), ModelBackend::FaceDetector(_)));
    }

    #[tokio::test]
    async fn detect_before_load_fails() {
        let runtime = StubRuntime::default();
        let b = backend("coco-ssd", &runtime);
        let frame = Frame::solid(0, 4, 4, [0, 0, 0]).unwrap();

        assert_eq!(b.state(), BackendState::Unloaded);
        assert!(matches!(b.detect(&frame).await, Err(InferenceError::Detection(_))));
    }

    #[tokio::test]
    async fn detect_after_dispose_fails() {
        let runtime = StubRuntime::default();
        let mut b = backend("coco-ssd", &runtime);
        let frame = Frame::solid(0, 4, 4, [0, 0, 0]).unwrap();

        b.load().await.unwrap();
        b.dispose();

        let err = b.detect(&frame).await.unwrap_err();
        assert!(err.to_string().contains("disposed"), "got {err}");
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_releases_memory() {
        let runtime = StubRuntime::default();
        let mut b = backend("coco-ssd", &runtime);

        b.load().await.unwrap();
        assert_eq!(runtime.memory().models_resident, 1);

        b.dispose();
        b.dispose();
        assert_eq!(b.state(), BackendState::Disposed);
        assert_eq!(runtime.memory().models_resident, 0);
    }

    #[tokio::test]
    async fn reload_after_dispose_reaches_same_ready_state() {
        let runtime = StubRuntime::default();
        let mut b = backend("coco-ssd", &runtime);
        let frame = Frame::solid(0, 8, 8, [0, 0, 0]).unwrap();

        b.load().await.unwrap();
        let first = b.detect(&frame).await.unwrap();
        let first_memory = runtime.memory();

        b.dispose();
        b.load().await.unwrap();

        assert_eq!(b.state(), BackendState::Ready);
        assert_eq!(b.detect(&frame).await.unwrap(), first);
        assert_eq!(runtime.memory(), first_memory);
    }

    #[tokio::test]
    async fn classifier_boxes_cover_full_frame() {
        let runtime = StubRuntime::default();
        let mut b = backend("mobilenet", &runtime);
        let frame = Frame::solid(0, 320, 240, [200, 10, 10]).unwrap();

        b.load().await.unwrap();
        let detections = b.detect(&frame).await.unwrap();

        assert_eq!(detections.len(), 3, "One detection per returned class");
        for d in &detections {
            assert_eq!(d.bounding_box, BoundingBox::full_frame(320, 240));
        }
        assert_eq!(detections[0].label, "red");
    }

    #[tokio::test]
    async fn failed_load_stays_unloaded() {
        let runtime = StubRuntime::default().failing_on("blazeface");
        let mut b = backend("blazeface", &runtime);

        let err = b.load().await.unwrap_err();
        assert!(matches!(err, InferenceError::ModelLoad { .. }));
        assert_eq!(b.state(), BackendState::Unloaded);
    }
}
