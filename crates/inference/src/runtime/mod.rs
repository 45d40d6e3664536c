//! Accelerator runtimes that turn a [`ModelDescriptor`] into something that
//! can run a frame, plus the memory accounting used to prove that disposed
//! models really give their weights back.

use crate::catalog::ModelDescriptor;
use async_trait::async_trait;
use schema::{BoundingBox, Frame};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[cfg(feature = "ort-backend")]
pub mod ort;
mod stub;

pub use stub::StubRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Gpu,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Gpu => "gpu",
            Device::Cpu => "cpu",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub bytes_in_use: u64,
    pub models_resident: usize,
}

impl MemoryStats {
    pub fn megabytes(&self) -> f64 {
        self.bytes_in_use as f64 / (1024.0 * 1024.0)
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    bytes: AtomicU64,
    models: AtomicUsize,
}

/// Shared allocator bookkeeping for one runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `bytes` for one resident model. Released when the guard drops.
    pub fn allocate(&self, bytes: u64) -> Allocation {
        self.inner.bytes.fetch_add(bytes, Ordering::SeqCst);
        self.inner.models.fetch_add(1, Ordering::SeqCst);
        Allocation {
            ledger: Arc::clone(&self.inner),
            bytes,
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            bytes_in_use: self.inner.bytes.load(Ordering::SeqCst),
            models_resident: self.inner.models.load(Ordering::SeqCst),
        }
    }
}

/// Guard for memory held by a compiled model.
#[derive(Debug)]
pub struct Allocation {
    ledger: Arc<LedgerInner>,
    bytes: u64,
}

impl Allocation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.ledger.bytes.fetch_sub(self.bytes, Ordering::SeqCst);
        self.ledger.models.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One localized hit as the model reports it, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBox {
    pub bbox: BoundingBox,
    pub label: Option<String>,
    pub score: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassScore {
    pub label: Option<String>,
    pub probability: Option<f32>,
}

/// Native output of a compiled model.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Boxes(Vec<RawBox>),
    Classes(Vec<ClassScore>),
}

#[async_trait]
pub trait CompiledModel: Send + Sync {
    async fn infer(&self, frame: &Frame) -> anyhow::Result<RawOutput>;
}

#[async_trait]
pub trait InferenceRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    fn device(&self) -> Device;

    /// Fetch and compile weights for `descriptor`. The returned model keeps its
    /// accelerator memory until dropped.
    async fn compile(&self, descriptor: &ModelDescriptor) -> anyhow::Result<Box<dyn CompiledModel>>;

    fn memory(&self) -> MemoryStats;

    /// Accelerator busy percentage, when the platform exposes one.
    fn gpu_utilization(&self) -> Option<f32> {
        None
    }
}
