//! ONNX Runtime backed runtime.
//!
//! Models are exported with an `images` input (`[1, 3, H, W]`, ImageNet
//! normalized). Detectors additionally take `orig_target_sizes` and return
//! `labels`/`boxes`/`scores`; classifiers return `logits`.

use super::{
    Allocation, CompiledModel, Device, InferenceRuntime, MemoryLedger, MemoryStats, RawOutput,
};
use crate::catalog::{ModelCategory, ModelDescriptor};
use crate::postprocessing::{parse_boxes, softmax, top_k_classes};
use crate::preprocessing::PreProcessor;
use anyhow::Context;
use async_trait::async_trait;
use ndarray::{Array, IxDyn};
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use schema::Frame;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub model_dir: PathBuf,
    pub detector_input: (u32, u32),
    pub classifier_input: (u32, u32),
    pub confidence_threshold: f32,
    pub top_k: usize,
    pub intra_threads: usize,
}

impl Default for OrtConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            detector_input: (640, 640),
            classifier_input: (224, 224),
            confidence_threshold: 0.5,
            top_k: 3,
            intra_threads: 4,
        }
    }
}

pub struct OrtRuntime {
    config: OrtConfig,
    device: Device,
    ledger: MemoryLedger,
}

impl OrtRuntime {
    /// Initialize ONNX Runtime, preferring CUDA and falling back to CPU.
    pub fn new(config: OrtConfig) -> anyhow::Result<Self> {
        // Idempotent
        let _ = ort::init().commit();

        let device = match CUDAExecutionProvider::default().is_available() {
            Ok(true) => Device::Gpu,
            Ok(false) => {
                tracing::warn!("CUDA execution provider unavailable, falling back to CPU");
                Device::Cpu
            }
            Err(e) => {
                tracing::warn!(error = %e, "CUDA probe failed, falling back to CPU");
                Device::Cpu
            }
        };

        tracing::info!(device = device.as_str(), model_dir = %config.model_dir.display(), "ONNX Runtime ready");

        Ok(Self {
            config,
            device,
            ledger: MemoryLedger::new(),
        })
    }

    fn build_session(&self, path: &Path) -> anyhow::Result<(Session, Device)> {
        let builder = || -> anyhow::Result<_> {
            Ok(Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(self.config.intra_threads)?)
        };

        if self.device == Device::Gpu {
            let cuda = builder()?
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()
                    .error_on_failure()])
                .and_then(|b| b.commit_from_file(path));
            match cuda {
                Ok(session) => return Ok((session, Device::Gpu)),
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "CUDA session failed, retrying on CPU");
                }
            }
        }

        let session = builder()?.commit_from_file(path)?;
        Ok((session, Device::Cpu))
    }
}

fn read_labels(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[async_trait]
impl InferenceRuntime for OrtRuntime {
    fn name(&self) -> &'static str {
        "onnxruntime"
    }

    fn device(&self) -> Device {
        self.device
    }

    async fn compile(&self, descriptor: &ModelDescriptor) -> anyhow::Result<Box<dyn CompiledModel>> {
        let model_path = self.config.model_dir.join(format!("{}.onnx", descriptor.id));
        let labels_path = self.config.model_dir.join(format!("{}.labels", descriptor.id));

        let bytes = std::fs::metadata(&model_path)
            .with_context(|| format!("model weights not found at {}", model_path.display()))?
            .len();

        let (session, device) = self
            .build_session(&model_path)
            .with_context(|| format!("compile {}", model_path.display()))?;
        let class_names = read_labels(&labels_path);

        let input_size = match descriptor.category {
            ModelCategory::Classification => self.config.classifier_input,
            _ => self.config.detector_input,
        };

        tracing::info!(
            model = %descriptor.id,
            device = device.as_str(),
            classes = class_names.len(),
            bytes,
            "Model loaded from {}",
            model_path.display()
        );

        Ok(Box::new(OrtModel {
            pipeline: Arc::new(Mutex::new(Pipeline {
                session,
                pre: PreProcessor::new(input_size),
            })),
            category: descriptor.category,
            class_names: Arc::new(class_names),
            confidence_threshold: self.config.confidence_threshold,
            top_k: self.config.top_k,
            _allocation: self.ledger.allocate(bytes),
        }))
    }

    fn memory(&self) -> MemoryStats {
        self.ledger.stats()
    }
}

struct Pipeline {
    session: Session,
    pre: PreProcessor,
}

struct OrtModel {
    pipeline: Arc<Mutex<Pipeline>>,
    category: ModelCategory,
    class_names: Arc<Vec<String>>,
    confidence_threshold: f32,
    top_k: usize,
    _allocation: Allocation,
}

impl Pipeline {
    fn detect(
        &mut self,
        frame: &Frame,
        class_names: &[String],
        threshold: f32,
    ) -> anyhow::Result<RawOutput> {
        let (images, transform) = self.pre.preprocess(frame)?;
        let (w, h) = self.pre.input_size;
        let sizes = Array::from_shape_vec(IxDyn(&[1, 2]), vec![w as i64, h as i64])?;

        let outputs = self.session.run(ort::inputs![
            "images" => TensorRef::from_array_view(images.view())?,
            "orig_target_sizes" => TensorRef::from_array_view(sizes.view())?
        ])?;

        let labels = outputs["labels"].try_extract_array::<i64>()?;
        let boxes = outputs["boxes"].try_extract_array::<f32>()?;
        let scores = outputs["scores"].try_extract_array::<f32>()?;

        let parsed = parse_boxes(&labels, &boxes, &scores, &transform, threshold, class_names)?;
        Ok(RawOutput::Boxes(parsed))
    }

    fn classify(
        &mut self,
        frame: &Frame,
        class_names: &[String],
        top_k: usize,
    ) -> anyhow::Result<RawOutput> {
        let (images, _) = self.pre.preprocess(frame)?;

        let outputs = self.session.run(ort::inputs![
            "images" => TensorRef::from_array_view(images.view())?
        ])?;

        let logits = outputs["logits"].try_extract_array::<f32>()?;
        let logits: Vec<f32> = logits.iter().copied().collect();
        let probabilities = softmax(&logits);

        Ok(RawOutput::Classes(top_k_classes(&probabilities, top_k, class_names)))
    }
}

#[async_trait]
impl CompiledModel for OrtModel {
    async fn infer(&self, frame: &Frame) -> anyhow::Result<RawOutput> {
        let pipeline = Arc::clone(&self.pipeline);
        let class_names = Arc::clone(&self.class_names);
        let frame = frame.clone();
        let category = self.category;
        let threshold = self.confidence_threshold;
        let top_k = self.top_k;

        tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline
                .lock()
                .map_err(|_| anyhow::anyhow!("inference pipeline poisoned"))?;
            match category {
                ModelCategory::Classification => pipeline.classify(&frame, &class_names, top_k),
                _ => pipeline.detect(&frame, &class_names, threshold),
            }
        })
        .await
        .context("inference task panicked")?
    }
}
