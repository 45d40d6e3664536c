use async_trait::async_trait;
use capture::{
    CaptureFormat, DeviceProvider, FrameProducer, LocalDevice, Locator, MjpegConnector,
    SourceDescriptor, SourceError, SourceKind, SourceRegistry, UnavailableReason,
};
use schema::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Cameras whose close takes a while, recording how many are open at once.
#[derive(Default)]
struct SlowCloseCameras {
    open: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct SlowCapture {
    open: Arc<AtomicUsize>,
    closed: bool,
}

#[async_trait]
impl FrameProducer for SlowCapture {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        Frame::solid(0, 4, 4, [1, 2, 3]).map_err(|e| SourceError::Capture(e.to_string()))
    }

    async fn close(&mut self) {
        if !self.closed {
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.open.fetch_sub(1, Ordering::SeqCst);
            self.closed = true;
        }
    }
}

#[async_trait]
impl DeviceProvider for SlowCloseCameras {
    async fn enumerate(&self) -> Result<Vec<LocalDevice>, SourceError> {
        Ok(["A", "B", "C"]
            .into_iter()
            .map(|name| LocalDevice {
                handle: format!("cam-{name}"),
                name: name.to_string(),
            })
            .collect())
    }

    async fn open(
        &self,
        id: &str,
        handle: &str,
        _format: CaptureFormat,
    ) -> Result<Box<dyn FrameProducer>, SourceError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if handle == "cam-broken" {
            return Err(SourceError::unavailable(id, UnavailableReason::Busy, handle));
        }
        let now_open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_open, Ordering::SeqCst);
        Ok(Box::new(SlowCapture {
            open: Arc::clone(&self.open),
            closed: false,
        }))
    }
}

fn setup() -> (Arc<SourceRegistry>, Arc<SlowCloseCameras>) {
    let cameras = Arc::new(SlowCloseCameras::default());
    let registry = Arc::new(SourceRegistry::new(
        cameras.clone() as Arc<dyn DeviceProvider>,
        Arc::new(MjpegConnector::default()),
        CaptureFormat::default(),
    ));
    (registry, cameras)
}

#[tokio::test(start_paused = true)]
async fn test_sequential_activation_never_double_opens() {
    let (registry, cameras) = setup();
    registry.discover_local_sources().await.unwrap();

    for id in ["local-1", "local-2", "local-3", "local-1", "local-1"] {
        registry.activate_id(id).await.unwrap();
        assert_eq!(cameras.open.load(Ordering::SeqCst), 1);
    }

    assert_eq!(cameras.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_activation_never_double_opens() {
    let (registry, cameras) = setup();
    registry.discover_local_sources().await.unwrap();

    let mut tasks = Vec::new();
    for round in 0..9 {
        let registry = Arc::clone(&registry);
        let id = format!("local-{}", round % 3 + 1);
        tasks.push(tokio::spawn(async move { registry.activate_id(&id).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(
        cameras.peak.load(Ordering::SeqCst),
        1,
        "Two captures were open at the same time"
    );
    assert_eq!(cameras.open.load(Ordering::SeqCst), 1);
    assert!(registry.active_source().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failure_mid_sequence_releases_everything() {
    let (registry, cameras) = setup();
    registry.discover_local_sources().await.unwrap();
    registry.activate_id("local-1").await.unwrap();

    let broken = SourceDescriptor {
        id: "local-4".to_string(),
        kind: SourceKind::LocalCamera,
        display_name: "Broken".to_string(),
        locator: Locator::Device("cam-broken".to_string()),
    };
    assert!(registry.activate(&broken).await.is_err());

    assert_eq!(cameras.open.load(Ordering::SeqCst), 0);
    assert!(registry.active_source().is_none());

    registry.activate_id("local-2").await.unwrap();
    assert!(registry.capture().await.is_ok());
}
