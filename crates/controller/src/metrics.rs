//! Throughput and resource metrics.
//!
//! Frame completions feed a per-second counter that is folded into a sliding
//! window once a second has elapsed; the displayed rate is the window mean.
//! Resource figures are sampled on their own cadence and never block the loop.

use inference::{MemoryStats, ModelRegistry};
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

const ROLLOVER: Duration = Duration::from_millis(1000);

/// Where memory and accelerator figures come from.
pub trait ResourceSource: Send + Sync {
    fn memory(&self) -> MemoryStats;

    fn gpu_utilization(&self) -> Option<f32> {
        None
    }
}

impl ResourceSource for ModelRegistry {
    fn memory(&self) -> MemoryStats {
        ModelRegistry::memory(self)
    }

    fn gpu_utilization(&self) -> Option<f32> {
        ModelRegistry::gpu_utilization(self)
    }
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of per-second samples averaged into the displayed rate.
    pub window: usize,
    /// Resource sampling cadence.
    pub interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            window: 30,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub frames_per_second: u32,
    pub memory_mb: f64,
    pub cpu_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_percent: Option<f32>,
}

/// Which fields differ from the previous snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsChanges {
    pub frames_per_second: bool,
    pub memory_mb: bool,
    pub cpu_percent: bool,
    pub gpu_percent: bool,
}

impl MetricsChanges {
    pub fn any(&self) -> bool {
        self.frames_per_second || self.memory_mb || self.cpu_percent || self.gpu_percent
    }
}

impl MetricsSnapshot {
    pub fn changes(&self, previous: &MetricsSnapshot) -> MetricsChanges {
        MetricsChanges {
            frames_per_second: self.frames_per_second != previous.frames_per_second,
            memory_mb: self.memory_mb != previous.memory_mb,
            cpu_percent: self.cpu_percent != previous.cpu_percent,
            gpu_percent: self.gpu_percent != previous.gpu_percent,
        }
    }
}

/// Sliding-window frames-per-second counter.
#[derive(Debug)]
pub struct FpsCounter {
    window: VecDeque<f64>,
    capacity: usize,
    frames: u32,
    last_update: Instant,
    rate: u32,
}

impl FpsCounter {
    pub fn new(capacity: usize, now: Instant) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            frames: 0,
            last_update: now,
            rate: 0,
        }
    }

    pub fn record_frame_at(&mut self, now: Instant) -> u32 {
        self.frames += 1;
        self.tick_at(now)
    }

    /// Fold pending frames into the window once a second has passed since
    /// the last fold. Returns the displayed rate.
    pub fn tick_at(&mut self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.last_update);
        if elapsed < ROLLOVER {
            return self.rate;
        }

        let per_second = self.frames as f64 / elapsed.as_secs_f64();
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(per_second);
        self.frames = 0;
        self.last_update = now;

        let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
        self.rate = mean.round() as u32;
        self.rate
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self, now: Instant) {
        self.window.clear();
        self.frames = 0;
        self.last_update = now;
        self.rate = 0;
    }
}

/// Process CPU usage from `getrusage` deltas, normalized over all cores.
#[derive(Debug)]
struct CpuSampler {
    last: Option<(Duration, std::time::Instant)>,
    cores: f64,
}

impl CpuSampler {
    fn new() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        Self { last: None, cores }
    }

    fn sample(&mut self) -> Option<f32> {
        let cpu = process_cpu_time()?;
        let wall = std::time::Instant::now();
        let previous = self.last.replace((cpu, wall));

        let (prev_cpu, prev_wall) = previous?;
        let wall_delta = wall.duration_since(prev_wall).as_secs_f64();
        if wall_delta <= 0.0 {
            return None;
        }
        let cpu_delta = cpu.saturating_sub(prev_cpu).as_secs_f64();
        let percent = (cpu_delta / wall_delta / self.cores * 100.0).clamp(0.0, 100.0);
        Some(((percent * 10.0).round() / 10.0) as f32)
    }
}

#[cfg(unix)]
fn process_cpu_time() -> Option<Duration> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct.
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if ret != 0 {
        return None;
    }
    // SAFETY: initialized by the successful call above.
    let usage = unsafe { usage.assume_init() };
    let timeval = |tv: libc::timeval| {
        Duration::from_secs(tv.tv_sec.max(0) as u64) + Duration::from_micros(tv.tv_usec.max(0) as u64)
    };
    Some(timeval(usage.ru_utime) + timeval(usage.ru_stime))
}

#[cfg(not(unix))]
fn process_cpu_time() -> Option<Duration> {
    None
}

struct Instruments {
    frames_counter: Counter<u64>,
    iteration_histogram: Histogram<f64>,
    fps_gauge: Gauge<f64>,
    memory_gauge: Gauge<f64>,
    cpu_gauge: Gauge<f64>,
}

fn init_metrics(meter_name: &'static str) -> Instruments {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.005, 0.01, 0.016, 0.025, 0.033, 0.05, 0.075, 0.1, 0.15, 0.25, 0.5, 1.0,
    ];

    Instruments {
        frames_counter: meter
            .u64_counter("detection_frames_total")
            .with_description("Total frames captured, detected and rendered")
            .build(),
        iteration_histogram: meter
            .f64_histogram("detection_iteration_seconds")
            .with_description("Time for one capture + detect + render iteration")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        fps_gauge: meter
            .f64_gauge("detection_fps")
            .with_description("Windowed mean of frames per second")
            .build(),
        memory_gauge: meter
            .f64_gauge("model_memory_mb")
            .with_description("Accelerator memory held by loaded models")
            .with_unit("MB")
            .build(),
        cpu_gauge: meter
            .f64_gauge("process_cpu_percent")
            .with_description("Process CPU usage across all cores")
            .with_unit("%")
            .build(),
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MetricsSampler {
    config: SamplerConfig,
    resources: Arc<dyn ResourceSource>,
    fps: Mutex<FpsCounter>,
    cpu: Mutex<CpuSampler>,
    snapshot: watch::Sender<MetricsSnapshot>,
    instruments: Instruments,
}

impl MetricsSampler {
    pub fn new(config: SamplerConfig, resources: Arc<dyn ResourceSource>) -> Self {
        let fps = FpsCounter::new(config.window, Instant::now());
        let (snapshot, _) = watch::channel(MetricsSnapshot::default());
        Self {
            config,
            resources,
            fps: Mutex::new(fps),
            cpu: Mutex::new(CpuSampler::new()),
            snapshot,
            instruments: init_metrics("controller"),
        }
    }

    pub fn record_frame_completed(&self) {
        locked(&self.fps).record_frame_at(Instant::now());
        self.instruments.frames_counter.add(1, &[]);
    }

    pub(crate) fn record_iteration(&self, elapsed: Duration) {
        self.instruments
            .iteration_histogram
            .record(elapsed.as_secs_f64(), &[]);
    }

    /// Displayed frame rate without taking a resource sample.
    pub fn frames_per_second(&self) -> u32 {
        locked(&self.fps).rate()
    }

    /// Take a full sample and publish it to subscribers.
    pub fn sample(&self) -> MetricsSnapshot {
        let frames_per_second = locked(&self.fps).tick_at(Instant::now());
        let memory_mb = self.resources.memory().megabytes().round();
        let cpu_percent = locked(&self.cpu)
            .sample()
            .unwrap_or_else(|| self.snapshot.borrow().cpu_percent);
        let gpu_percent = self.resources.gpu_utilization();

        let snapshot = MetricsSnapshot {
            frames_per_second,
            memory_mb,
            cpu_percent,
            gpu_percent,
        };

        self.instruments
            .fps_gauge
            .record(frames_per_second as f64, &[]);
        self.instruments.memory_gauge.record(memory_mb, &[]);
        self.instruments
            .cpu_gauge
            .record(cpu_percent as f64, &[]);

        self.snapshot.send_if_modified(|current| {
            let changed = snapshot.changes(current).any();
            *current = snapshot;
            changed
        });
        snapshot
    }

    pub fn current(&self) -> MetricsSnapshot {
        *self.snapshot.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MetricsSnapshot> {
        self.snapshot.subscribe()
    }

    /// Clear the frame-rate window so a restarted loop does not inherit stale averages.
    pub fn reset(&self) {
        locked(&self.fps).reset(Instant::now());
        self.snapshot.send_if_modified(|current| {
            let changed = current.frames_per_second != 0;
            current.frames_per_second = 0;
            changed
        });
    }

    /// Sample on the configured cadence until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.config.interval.max(crate::pacing::MIN_PERIOD));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::debug!(interval_ms = self.config.interval.as_millis() as u64, "Metrics sampler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let snapshot = self.sample();
                    tracing::trace!(
                        fps = snapshot.frames_per_second,
                        memory_mb = snapshot.memory_mb,
                        cpu = snapshot.cpu_percent,
                        "Metrics sampled"
                    );
                }
            }
        }
        tracing::debug!("Metrics sampler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResources(u64);

    impl ResourceSource for FixedResources {
        fn memory(&self) -> MemoryStats {
            MemoryStats {
                bytes_in_use: self.0,
                models_resident: 1,
            }
        }

        fn gpu_utilization(&self) -> Option<f32> {
            Some(42.0)
        }
    }

    fn sampler(bytes: u64) -> MetricsSampler {
        MetricsSampler::new(SamplerConfig::default(), Arc::new(FixedResources(bytes)))
    }

    // ========== FPS Window ==========

    #[test]
    fn thirty_uniform_frames_over_one_second_reads_thirty() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(30, start);

        let mut rate = 0;
        for i in 1..=30u64 {
            rate = fps.record_frame_at(start + Duration::from_nanos(i * 1_000_000_000 / 30));
        }

        assert!((29..=31).contains(&rate), "expected ~30, got {rate}");
        assert_eq!(fps.samples(), 1);
    }

    #[test]
    fn zero_frames_over_full_window_reads_zero() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(30, start);

        for second in 1..=30u64 {
            fps.tick_at(start + Duration::from_secs(second));
        }

        assert_eq!(fps.rate(), 0);
        assert_eq!(fps.samples(), 30);
    }

    #[test]
    fn rate_holds_until_a_second_elapses() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(30, start);

        for i in 0..10 {
            fps.record_frame_at(start + Duration::from_millis(i * 50));
        }
        assert_eq!(fps.rate(), 0, "no rollover before 1000ms");
    }

    #[test]
    fn window_evicts_oldest_sample() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(2, start);

        // 10 fps, then 20 fps, then 30 fps: window keeps the last two.
        let mut t = start;
        for rate in [10u32, 20, 30] {
            for _ in 0..rate {
                fps.record_frame_at(t);
            }
            t += Duration::from_secs(1);
            fps.tick_at(t);
        }

        assert_eq!(fps.samples(), 2);
        assert_eq!(fps.rate(), 25);
    }

    #[test]
    fn reset_clears_window() {
        let start = Instant::now();
        let mut fps = FpsCounter::new(30, start);
        for _ in 0..30 {
            fps.record_frame_at(start);
        }
        fps.tick_at(start + Duration::from_secs(1));
        assert_eq!(fps.rate(), 30);

        fps.reset(start + Duration::from_secs(1));
        assert_eq!(fps.rate(), 0);
        assert_eq!(fps.samples(), 0);
    }

    // ========== Snapshots ==========

    #[test]
    fn changes_reports_differing_fields() {
        let before = MetricsSnapshot {
            frames_per_second: 30,
            memory_mb: 50.0,
            cpu_percent: 12.5,
            gpu_percent: None,
        };
        let after = MetricsSnapshot {
            frames_per_second: 29,
            ..before
        };

        let changes = after.changes(&before);
        assert!(changes.frames_per_second);
        assert!(!changes.memory_mb);
        assert!(changes.any());
        assert!(!before.changes(&before).any());
    }

    #[test]
    fn snapshot_omits_missing_gpu() {
        let json = serde_json::to_value(MetricsSnapshot::default()).unwrap();
        assert!(json.get("gpu_percent").is_none());
        assert_eq!(json["frames_per_second"], 0);
    }

    // ========== Sampler ==========

    #[tokio::test]
    async fn sample_reads_memory_and_gpu_from_resources() {
        let sampler = sampler(50 * 1024 * 1024);
        let snapshot = sampler.sample();

        assert_eq!(snapshot.memory_mb, 50.0);
        assert_eq!(snapshot.gpu_percent, Some(42.0));
        assert_eq!(sampler.current(), snapshot);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_zeroes_published_rate() {
        let sampler = sampler(0);
        for _ in 0..30 {
            sampler.record_frame_completed();
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(sampler.sample().frames_per_second, 30);

        sampler.reset();
        assert_eq!(sampler.frames_per_second(), 0);
        assert_eq!(sampler.current().frames_per_second, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_publishes_until_shutdown() {
        let sampler = Arc::new(sampler(8 * 1024 * 1024));
        let mut updates = sampler.subscribe();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let task = {
            let sampler = Arc::clone(&sampler);
            tokio::spawn(async move {
                sampler
                    .run(async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        updates.changed().await.unwrap();
        assert_eq!(updates.borrow().memory_mb, 8.0);

        stop_tx.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_samples() {
        let sampler = Arc::new(MetricsSampler::new(
            SamplerConfig {
                interval: Duration::ZERO,
                ..SamplerConfig::default()
            },
            Arc::new(FixedResources(2 * 1024 * 1024)),
        ));
        let mut updates = sampler.subscribe();

        let task = {
            let sampler = Arc::clone(&sampler);
            tokio::spawn(async move {
                sampler
                    .run(tokio::time::sleep(Duration::from_millis(10)))
                    .await
            })
        };

        updates.changed().await.unwrap();
        assert_eq!(updates.borrow().memory_mb, 2.0);
        task.await.unwrap();
    }

}
