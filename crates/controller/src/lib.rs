//! Detection loop orchestration: the `Idle → Running ⇄ Paused → Stopped`
//! controller that pulls frames from the active source, runs the active
//! model and hands results to a render sink, plus the metrics sampler that
//! observes it.

pub mod error;
pub mod metrics;
pub mod pacing;
pub mod render;
pub mod service;
pub mod state_machine;

pub use error::{ControllerError, Missing};
pub use metrics::{
    FpsCounter, MetricsChanges, MetricsSampler, MetricsSnapshot, ResourceSource, SamplerConfig,
};
pub use pacing::Pacing;
pub use render::{RecordingSink, RenderSink};
pub use service::{DetectionLoop, LoopConfig};
pub use state_machine::{LoopAction, LoopState};
