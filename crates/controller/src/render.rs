use schema::{Detection, Frame};
use std::sync::Mutex;

/// Receives each completed iteration: the captured frame and what was found in it.
///
/// Called from the loop task; implementations must not block for long and
/// must accept an empty detection list.
pub trait RenderSink: Send + Sync {
    fn render(&self, frame: &Frame, detections: &[Detection]);
}

/// Keeps `(frame sequence, detection count)` for each render.
#[derive(Debug, Default)]
pub struct RecordingSink {
    renders: Mutex<Vec<(u64, usize)>>,
}

impl RecordingSink {
    pub fn renders(&self) -> Vec<(u64, usize)> {
        self.renders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.renders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl RenderSink for RecordingSink {
    fn render(&self, frame: &Frame, detections: &[Detection]) {
        self.renders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((frame.sequence(), detections.len()));
    }
}
