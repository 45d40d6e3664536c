use crate::error::{ControllerError, Missing};
use crate::metrics::MetricsSampler;
use crate::pacing::Pacing;
use crate::render::RenderSink;
use crate::state_machine::{LoopAction, LoopState};
use capture::SourceRegistry;
use inference::ModelRegistry;
use schema::{Detection, Frame};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span, error, info, trace};

#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    pub pacing: Pacing,
}

/// Handle on one spawned run of the loop task.
struct Run {
    cancel: watch::Sender<bool>,
    exited: watch::Receiver<()>,
}

struct Control {
    state: LoopState,
    /// Bumped whenever the loop leaves `Running`; a task only renders while
    /// its generation is current.
    generation: u64,
    run: Option<Run>,
    last_error: Option<ControllerError>,
}

impl Control {
    fn halt(&mut self) {
        self.generation += 1;
        if let Some(run) = &self.run {
            run.cancel.send_replace(true);
        }
    }
}

struct Shared {
    sources: Arc<SourceRegistry>,
    models: Arc<ModelRegistry>,
    sink: Arc<dyn RenderSink>,
    metrics: Arc<MetricsSampler>,
    config: LoopConfig,
    control: Mutex<Control>,
    state_tx: watch::Sender<LoopState>,
}

impl Shared {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, control: &mut Control, next: LoopState) {
        debug!(from = %control.state, to = %next, "Loop state change");
        control.state = next;
        self.state_tx.send_replace(next);
    }

    fn check_ready(&self) -> Result<(), ControllerError> {
        let has_source = self.sources.active_source().is_some();
        let has_model = self.models.current_model().is_some();
        let missing = match (has_source, has_model) {
            (true, true) => return Ok(()),
            (false, true) => Missing::Source,
            (true, false) => Missing::Model,
            (false, false) => Missing::SourceAndModel,
        };
        Err(ControllerError::NotReady { missing })
    }

    /// Capture one frame and run the active model on it.
    ///
    /// Registry handles are borrowed only for the duration of each call, so a
    /// swap between iterations is picked up on the next one.
    async fn iterate(&self) -> Result<(Frame, Vec<Detection>), ControllerError> {
        let frame = self.sources.capture().await?;
        let detections = self.models.detect(&frame).await?;
        trace!(
            sequence = frame.sequence(),
            detections = detections.len(),
            "Iteration complete"
        );
        Ok((frame, detections))
    }

    /// Render under the control lock so a concurrent pause or stop either
    /// happens before (and suppresses) this render or after it.
    fn render_if_current(&self, generation: u64, frame: &Frame, detections: &[Detection]) -> bool {
        let control = self.control();
        if control.generation != generation || control.state != LoopState::Running {
            return false;
        }
        self.sink.render(frame, detections);
        true
    }

    fn fail(&self, generation: u64, err: ControllerError) {
        let mut control = self.control();
        if control.generation != generation || control.state != LoopState::Running {
            debug!(error = %err, "Iteration failed after loop left running, discarded");
            return;
        }

        error!(error = %err, "Detection iteration failed, loop paused");
        control.generation += 1;
        control.last_error = Some(err);
        self.transition(&mut control, LoopState::Paused);
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the run.
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

async fn wait_exited(mut exited: watch::Receiver<()>) {
    while exited.changed().await.is_ok() {}
}

async fn run_loop(
    shared: Arc<Shared>,
    generation: u64,
    mut cancel: watch::Receiver<bool>,
    previous: Option<watch::Receiver<()>>,
    _exited: watch::Sender<()>,
) {
    // Never overlap with a run that is still unwinding.
    if let Some(previous) = previous {
        wait_exited(previous).await;
    }

    let mut ticker = shared.config.pacing.ticker();
    debug!(generation, "Detection loop task started");

    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let span = debug_span!("detection_iteration", generation);
        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => {
                debug!("In-flight iteration discarded");
                break;
            }
            outcome = shared.iterate().instrument(span) => outcome,
        };

        match outcome {
            Ok((frame, detections)) => {
                if !shared.render_if_current(generation, &frame, &detections) {
                    break;
                }
                shared.metrics.record_frame_completed();
                shared.metrics.record_iteration(started.elapsed());
            }
            Err(e) => {
                shared.fail(generation, e);
                break;
            }
        }
    }

    debug!(generation, "Detection loop task exited");
}

/// Drives capture, detection and rendering while `Running`.
///
/// Iterations run strictly one after another on a single task. Leaving
/// `Running` cancels that task; a pending capture or detect is dropped and
/// its result never reaches the sink.
///
/// `start` and `resume` spawn onto the current tokio runtime.
pub struct DetectionLoop {
    shared: Arc<Shared>,
}

impl DetectionLoop {
    pub fn new(
        sources: Arc<SourceRegistry>,
        models: Arc<ModelRegistry>,
        sink: Arc<dyn RenderSink>,
        metrics: Arc<MetricsSampler>,
        config: LoopConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(LoopState::Idle);
        Self {
            shared: Arc::new(Shared {
                sources,
                models,
                sink,
                metrics,
                config,
                control: Mutex::new(Control {
                    state: LoopState::Idle,
                    generation: 0,
                    run: None,
                    last_error: None,
                }),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> LoopState {
        self.shared.control().state
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.shared.state_tx.subscribe()
    }

    /// The failure that last moved the loop to `Paused`, until the next resume.
    pub fn last_error(&self) -> Option<ControllerError> {
        self.shared.control().last_error.clone()
    }

    pub fn metrics(&self) -> &Arc<MetricsSampler> {
        &self.shared.metrics
    }

    pub fn start(&self) -> Result<(), ControllerError> {
        self.enter_running(LoopAction::Start)
    }

    pub fn resume(&self) -> Result<(), ControllerError> {
        self.enter_running(LoopAction::Resume)
    }

    fn enter_running(&self, action: LoopAction) -> Result<(), ControllerError> {
        let mut control = self.shared.control();
        let Some(next) = control.state.next(action)? else {
            return Ok(());
        };
        self.shared.check_ready()?;

        if action == LoopAction::Start {
            self.shared.metrics.reset();
        }
        control.last_error = None;
        control.generation += 1;
        let generation = control.generation;

        let (cancel, cancel_rx) = watch::channel(false);
        let (exited_tx, exited) = watch::channel(());
        let previous = control.run.take().map(|run| run.exited);
        tokio::spawn(run_loop(
            Arc::clone(&self.shared),
            generation,
            cancel_rx,
            previous,
            exited_tx,
        ));
        control.run = Some(Run { cancel, exited });

        info!(from = %control.state, action = %action, "Detection loop running");
        self.shared.transition(&mut control, next);
        Ok(())
    }

    /// Stop scheduling. A detect pending right now is abandoned.
    pub fn pause(&self) -> Result<(), ControllerError> {
        let mut control = self.shared.control();
        let Some(next) = control.state.next(LoopAction::Pause)? else {
            return Ok(());
        };
        control.halt();
        self.shared.transition(&mut control, next);
        info!("Detection loop paused");
        Ok(())
    }

    /// Enter the terminal `Stopped` state.
    ///
    /// Returns once the loop task has exited; no capture, detect or render
    /// happens after that. Sources and models stay with their registries.
    pub async fn stop(&self) {
        let exited = {
            let mut control = self.shared.control();
            if let Ok(Some(next)) = control.state.next(LoopAction::Stop) {
                control.halt();
                self.shared.transition(&mut control, next);
                self.shared.metrics.reset();
                info!("Detection loop stopped");
            }
            control.run.as_ref().map(|run| run.exited.clone())
        };

        if let Some(exited) = exited {
            wait_exited(exited).await;
        }
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        self.shared.control().halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SamplerConfig;
    use crate::render::RecordingSink;
    use capture::{CaptureFormat, MjpegConnector, SourceError, SyntheticDevices};
    use inference::{InferenceError, ModelCatalog, StubRuntime};
    use std::time::Duration;

    struct Fixture {
        detection_loop: DetectionLoop,
        sources: Arc<SourceRegistry>,
        models: Arc<ModelRegistry>,
        sink: Arc<RecordingSink>,
    }

    async fn fixture(activate: bool, load: bool) -> Fixture {
        let sources = Arc::new(SourceRegistry::new(
            Arc::new(SyntheticDevices::new(2)),
            Arc::new(MjpegConnector::default()),
            CaptureFormat {
                width: 16,
                height: 12,
                fps: 60,
            },
        ));
        sources.discover_local_sources().await.unwrap();
        if activate {
            sources.switch_to_next().await.unwrap();
        }

        let models = Arc::new(ModelRegistry::new(
            ModelCatalog::default(),
            Arc::new(StubRuntime::default()),
        ));
        if load {
            models.load_model("coco-ssd").await.unwrap();
        }

        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(MetricsSampler::new(
            SamplerConfig::default(),
            Arc::clone(&models) as Arc<dyn crate::metrics::ResourceSource>,
        ));
        let detection_loop = DetectionLoop::new(
            Arc::clone(&sources),
            Arc::clone(&models),
            Arc::clone(&sink) as Arc<dyn RenderSink>,
            metrics,
            LoopConfig {
                pacing: Pacing::Timer(Duration::from_millis(10)),
            },
        );

        Fixture {
            detection_loop,
            sources,
            models,
            sink,
        }
    }

    async fn wait_for_state(detection_loop: &DetectionLoop, state: LoopState) {
        let mut rx = detection_loop.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("state change timed out")
            .unwrap();
    }

    // ========== Readiness ==========

    #[tokio::test]
    async fn start_without_source_or_model_is_not_ready() {
        let f = fixture(false, false).await;

        let err = f.detection_loop.start().unwrap_err();

        assert_eq!(
            err,
            ControllerError::NotReady {
                missing: Missing::SourceAndModel
            }
        );
        assert_eq!(f.detection_loop.state(), LoopState::Idle);
    }

    #[tokio::test]
    async fn start_without_model_is_not_ready() {
        let f = fixture(true, false).await;

        assert_eq!(
            f.detection_loop.start().unwrap_err(),
            ControllerError::NotReady {
                missing: Missing::Model
            }
        );
        assert_eq!(f.detection_loop.state(), LoopState::Idle);
    }

    // ========== Running ==========

    #[tokio::test(start_paused = true)]
    async fn running_loop_renders_frames() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let renders = f.sink.renders();
        assert!(renders.len() >= 5, "expected several renders, got {}", renders.len());
        assert!(
            renders.windows(2).all(|w| w[0].0 < w[1].0),
            "frames should render in capture order"
        );
        assert!(renders.iter().all(|(_, count)| *count == 1));

        f.detection_loop.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_noop() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        f.detection_loop.start().unwrap();
        f.detection_loop.resume().unwrap();

        assert_eq!(f.detection_loop.state(), LoopState::Running);
        f.detection_loop.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_halts_rendering() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        f.detection_loop.pause().unwrap();
        let rendered = f.sink.count();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.detection_loop.state(), LoopState::Paused);
        assert_eq!(f.sink.count(), rendered, "no renders while paused");

        f.detection_loop.resume().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.sink.count() > rendered, "resume should render again");

        f.detection_loop.stop().await;
    }

    // ========== Failures ==========

    #[tokio::test(start_paused = true)]
    async fn capture_failure_pauses_with_error() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.sources.close().await;

        wait_for_state(&f.detection_loop, LoopState::Paused).await;
        assert_eq!(
            f.detection_loop.last_error(),
            Some(ControllerError::Source(SourceError::NoActiveSource))
        );

        // Nothing is rescheduled while the fault stands.
        let rendered = f.sink.count();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.sink.count(), rendered);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_after_failure_clears_error() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.models.dispose().await;
        wait_for_state(&f.detection_loop, LoopState::Paused).await;
        assert_eq!(
            f.detection_loop.last_error(),
            Some(ControllerError::Inference(InferenceError::NoModelLoaded))
        );

        assert!(f.detection_loop.resume().is_err(), "still no model");

        f.models.load_model("blazeface").await.unwrap();
        f.detection_loop.resume().unwrap();
        assert!(f.detection_loop.last_error().is_none());

        let rendered = f.sink.count();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.sink.count() > rendered);

        f.detection_loop.stop().await;
    }

    // ========== Stop ==========

    #[tokio::test(start_paused = true)]
    async fn stop_is_terminal() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        f.detection_loop.stop().await;
        f.detection_loop.stop().await;

        assert_eq!(f.detection_loop.state(), LoopState::Stopped);
        assert!(matches!(
            f.detection_loop.start(),
            Err(ControllerError::InvalidTransition {
                from: LoopState::Stopped,
                action: LoopAction::Start
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_leaves_resources_with_registries() {
        let f = fixture(true, true).await;

        f.detection_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.detection_loop.stop().await;

        assert!(f.sources.active_source().is_some());
        assert!(f.models.current_model().is_some());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let f = fixture(true, true).await;
        let mut rx = f.detection_loop.subscribe();

        f.detection_loop.start().unwrap();
        assert_eq!(*rx.borrow_and_update(), LoopState::Running);

        f.detection_loop.pause().unwrap();
        assert_eq!(*rx.borrow_and_update(), LoopState::Paused);

        f.detection_loop.stop().await;
        assert_eq!(*rx.borrow_and_update(), LoopState::Stopped);
    }
}
