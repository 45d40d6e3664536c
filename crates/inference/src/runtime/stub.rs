use super::{
    Allocation, ClassScore, CompiledModel, Device, InferenceRuntime, MemoryLedger, MemoryStats,
    RawBox, RawOutput,
};
use crate::catalog::{ModelCategory, ModelDescriptor};
use async_trait::async_trait;
use schema::{BoundingBox, Frame};
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_FOOTPRINT_BYTES: u64 = 16 * 1024 * 1024;

/// Deterministic in-process runtime.
///
/// Used when no accelerator backend is compiled in, and by tests that need a
/// runtime whose memory footprint and failures are predictable.
#[derive(Debug, Clone)]
pub struct StubRuntime {
    device: Device,
    ledger: MemoryLedger,
    load_delay: Duration,
    footprint: Option<u64>,
    failing: HashSet<String>,
}

impl StubRuntime {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            ledger: MemoryLedger::new(),
            load_delay: Duration::ZERO,
            footprint: None,
            failing: HashSet::new(),
        }
    }

    /// Simulated weight fetch time.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Fixed per-model footprint instead of the catalog size class.
    pub fn with_footprint(mut self, bytes: u64) -> Self {
        self.footprint = Some(bytes);
        self
    }

    /// Make compilation of `id` fail.
    pub fn failing_on(mut self, id: impl Into<String>) -> Self {
        self.failing.insert(id.into());
        self
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

impl Default for StubRuntime {
    fn default() -> Self {
        Self::new(Device::Cpu)
    }
}

#[async_trait]
impl InferenceRuntime for StubRuntime {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn device(&self) -> Device {
        self.device
    }

    async fn compile(&self, descriptor: &ModelDescriptor) -> anyhow::Result<Box<dyn CompiledModel>> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        if self.failing.contains(&descriptor.id) {
            anyhow::bail!("weights for {} could not be fetched", descriptor.id);
        }

        let bytes = self
            .footprint
            .or_else(|| descriptor.approximate_size_bytes())
            .unwrap_or(DEFAULT_FOOTPRINT_BYTES);

        tracing::debug!(model = %descriptor.id, bytes, "Stub model compiled");

        Ok(Box::new(StubModel {
            category: descriptor.category,
            _allocation: self.ledger.allocate(bytes),
        }))
    }

    fn memory(&self) -> MemoryStats {
        self.ledger.stats()
    }
}

struct StubModel {
    category: ModelCategory,
    _allocation: Allocation,
}

#[async_trait]
impl CompiledModel for StubModel {
    async fn infer(&self, frame: &Frame) -> anyhow::Result<RawOutput> {
        Ok(match self.category {
            ModelCategory::ObjectDetection => RawOutput::Boxes(vec![RawBox {
                bbox: centered_box(frame.width(), frame.height()),
                label: Some("object".to_string()),
                score: Some(0.9),
            }]),
            ModelCategory::Classification => RawOutput::Classes(dominant_colours(frame)),
            ModelCategory::FaceDetection => RawOutput::Boxes(Vec::new()),
        })
    }
}

/// Middle half of the frame in both directions.
fn centered_box(width: u32, height: u32) -> BoundingBox {
    let (w, h) = (width as f32, height as f32);
    BoundingBox::new(w / 4.0, h / 4.0, w / 2.0, h / 2.0)
}

/// Channel means ranked as three colour "classes".
fn dominant_colours(frame: &Frame) -> Vec<ClassScore> {
    let mut sums = [0u64; 3];
    for px in frame.pixels().chunks_exact(3) {
        for (sum, &v) in sums.iter_mut().zip(px) {
            *sum += v as u64;
        }
    }

    let total: u64 = sums.iter().sum();
    let mut classes: Vec<(&str, f32)> = ["red", "green", "blue"]
        .into_iter()
        .zip(sums)
        .map(|(name, sum)| {
            let p = if total == 0 {
                1.0 / 3.0
            } else {
                sum as f32 / total as f32
            };
            (name, p)
        })
        .collect();
    classes.sort_by(|a, b| b.1.total_cmp(&a.1));

    classes
        .into_iter()
        .map(|(name, p)| ClassScore {
            label: Some(name.to_string()),
            probability: Some(p),
        })
        .collect()
}
