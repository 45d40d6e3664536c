//! Model lifecycle: the catalog of known models, the per-family backends that
//! wrap a compiled model behind one `load`/`detect`/`dispose` contract, and
//! the registry that owns the single loaded backend.

pub mod backend;
pub mod catalog;
pub mod error;
pub mod postprocessing;
pub mod preprocessing;
pub mod registry;
pub mod runtime;

pub use backend::{
    BackendState, ClassifierBackend, FaceDetectorBackend, ModelBackend, ObjectDetectorBackend,
};
pub use catalog::{ModelCatalog, ModelCategory, ModelDescriptor};
pub use error::InferenceError;
pub use registry::ModelRegistry;
pub use runtime::{
    Allocation, ClassScore, CompiledModel, Device, InferenceRuntime, MemoryLedger, MemoryStats,
    RawBox, RawOutput, StubRuntime,
};

#[cfg(feature = "ort-backend")]
pub use runtime::ort::{OrtConfig, OrtRuntime};
