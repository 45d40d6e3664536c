use super::ModelSlot;
use crate::catalog::ModelDescriptor;
use crate::error::InferenceError;
use crate::postprocessing::normalize;
use crate::runtime::InferenceRuntime;
use schema::{Detection, Frame};
use std::sync::Arc;

const FACE_LABEL: &str = "face";

/// Single-class face detector.
pub struct FaceDetectorBackend {
    pub(super) slot: ModelSlot,
}

impl FaceDetectorBackend {
    pub fn new(descriptor: ModelDescriptor, runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self {
            slot: ModelSlot::new(descriptor, runtime),
        }
    }

    pub async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let raw = self.slot.infer(frame).await?;
        let mut detections = normalize(raw, frame.width(), frame.height(), FACE_LABEL);
        for d in &mut detections {
            d.label = FACE_LABEL.to_string();
        }
        Ok(detections)
    }
}
