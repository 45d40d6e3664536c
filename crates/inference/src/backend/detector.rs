use super::ModelSlot;
use crate::catalog::ModelDescriptor;
use crate::error::InferenceError;
use crate::postprocessing::{FALLBACK_LABEL, normalize};
use crate::runtime::InferenceRuntime;
use schema::{Detection, Frame};
use std::sync::Arc;

/// General object detector (COCO classes).
pub struct ObjectDetectorBackend {
    pub(super) slot: ModelSlot,
}

impl ObjectDetectorBackend {
    pub fn new(descriptor: ModelDescriptor, runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self {
            slot: ModelSlot::new(descriptor, runtime),
        }
    }

    pub async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let raw = self.slot.infer(frame).await?;
        Ok(normalize(raw, frame.width(), frame.height(), FALLBACK_LABEL))
    }
}
