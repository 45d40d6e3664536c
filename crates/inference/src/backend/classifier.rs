use super::ModelSlot;
use crate::catalog::ModelDescriptor;
use crate::error::InferenceError;
use crate::postprocessing::{FALLBACK_LABEL, normalize};
use crate::runtime::{ClassScore, InferenceRuntime, RawOutput};
use schema::{Detection, Frame};
use std::sync::Arc;

/// Whole-image classifier. Every class it reports becomes a detection that
/// spans the full frame.
pub struct ClassifierBackend {
    pub(super) slot: ModelSlot,
}

impl ClassifierBackend {
    pub fn new(descriptor: ModelDescriptor, runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self {
            slot: ModelSlot::new(descriptor, runtime),
        }
    }

    pub async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let classes = match self.slot.infer(frame).await? {
            RawOutput::Classes(classes) => classes,
            // A classifier has no localization; keep only label and score.
            RawOutput::Boxes(boxes) => boxes
                .into_iter()
                .map(|b| ClassScore {
                    label: b.label,
                    probability: b.score,
                })
                .collect(),
        };

        Ok(normalize(
            RawOutput::Classes(classes),
            frame.width(),
            frame.height(),
            FALLBACK_LABEL,
        ))
    }
}
