use crate::error::{SourceError, UnavailableReason};
use crate::platform::{CaptureFormat, DeviceProvider, FrameProducer, LocalDevice};
use async_trait::async_trait;
use schema::{Frame, RGB_CHANNELS};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

const HANDLE_PREFIX: &str = "synthetic:";

/// Test-pattern cameras that need no hardware.
#[derive(Debug, Clone, Default)]
pub struct SyntheticDevices {
    count: usize,
    open: Arc<AtomicUsize>,
}

impl SyntheticDevices {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            open: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Captures currently open across all synthetic cameras.
    pub fn open_captures(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceProvider for SyntheticDevices {
    async fn enumerate(&self) -> Result<Vec<LocalDevice>, SourceError> {
        Ok((0..self.count)
            .map(|i| LocalDevice {
                handle: format!("{HANDLE_PREFIX}{i}"),
                name: format!("Synthetic camera {}", i + 1),
            })
            .collect())
    }

    async fn open(
        &self,
        id: &str,
        handle: &str,
        format: CaptureFormat,
    ) -> Result<Box<dyn FrameProducer>, SourceError> {
        let index: usize = handle
            .strip_prefix(HANDLE_PREFIX)
            .and_then(|n| n.parse().ok())
            .filter(|&n| n < self.count)
            .ok_or_else(|| SourceError::unavailable(id, UnavailableReason::NotFound, handle))?;

        if format.width == 0 || format.height == 0 {
            return Err(SourceError::InvalidLocator(format!(
                "{}x{} capture format",
                format.width, format.height
            )));
        }

        self.open.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(id, handle, "Synthetic camera opened");

        let period = Duration::from_secs_f64(1.0 / format.fps.max(1) as f64).max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now(), period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(SyntheticCapture {
            seed: index as u32 * 97,
            format,
            sequence: 0,
            ticker,
            open: Some(Arc::clone(&self.open)),
        }))
    }
}

struct SyntheticCapture {
    seed: u32,
    format: CaptureFormat,
    sequence: u64,
    ticker: Interval,
    open: Option<Arc<AtomicUsize>>,
}

impl SyntheticCapture {
    /// Diagonal gradient that scrolls one pixel per frame.
    fn render(&self) -> Vec<u8> {
        let CaptureFormat { width, height, .. } = self.format;
        let shift = (self.sequence % 256) as u32 + self.seed;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * RGB_CHANNELS);
        for y in 0..height {
            for x in 0..width {
                pixels.push(((x + shift) % width * 255 / width) as u8);
                pixels.push(((y + shift) % height * 255 / height) as u8);
                pixels.push(((x + y + shift) % 256) as u8);
            }
        }
        pixels
    }

    fn release(&mut self) {
        if let Some(open) = self.open.take() {
            open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl FrameProducer for SyntheticCapture {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        if self.open.is_none() {
            return Err(SourceError::Capture("capture closed".to_string()));
        }
        self.ticker.tick().await;

        let frame = Frame::new(
            self.sequence,
            self.format.width,
            self.format.height,
            self.render(),
        )
        .map_err(|e| SourceError::Capture(e.to_string()))?;
        self.sequence += 1;
        Ok(frame)
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for SyntheticCapture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> CaptureFormat {
        CaptureFormat {
            width: 8,
            height: 6,
            fps: 30,
        }
    }

    #[tokio::test]
    async fn enumerates_configured_count() {
        let devices = SyntheticDevices::new(3).enumerate().await.unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[2].handle, "synthetic:2");
        assert_eq!(devices[0].name, "Synthetic camera 1");
    }

    #[tokio::test(start_paused = true)]
    async fn frames_have_requested_size_and_increasing_sequence() {
        let devices = SyntheticDevices::new(1);
        let mut capture = devices.open("local-1", "synthetic:0", small()).await.unwrap();

        let first = capture.next_frame().await.unwrap();
        let second = capture.next_frame().await.unwrap();

        assert_eq!((first.width(), first.height()), (8, 6));
        assert_eq!(second.sequence(), first.sequence() + 1);
        assert_ne!(first.pixels(), second.pixels(), "Pattern should move");
    }

    #[tokio::test(start_paused = true)]
    async fn extreme_frame_rate_still_delivers() {
        let devices = SyntheticDevices::new(1);
        let format = CaptureFormat {
            fps: u32::MAX,
            ..small()
        };
        let mut capture = devices.open("local-1", "synthetic:0", format).await.unwrap();

        capture.next_frame().await.unwrap();
        capture.next_frame().await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_and_stops_frames() {
        let devices = SyntheticDevices::new(1);
        let mut capture = devices.open("local-1", "synthetic:0", small()).await.unwrap();
        assert_eq!(devices.open_captures(), 1);

        capture.close().await;
        capture.close().await;

        assert_eq!(devices.open_captures(), 0);
        assert!(matches!(
            capture.next_frame().await,
            Err(SourceError::Capture(_))
        ));
    }

    #[tokio::test]
    async fn unknown_handle_is_not_found() {
        let devices = SyntheticDevices::new(1);
        let err = devices.open("local-9", "synthetic:9", small()).await.err().unwrap();
        assert!(matches!(
            err,
            SourceError::Unavailable {
                reason: UnavailableReason::NotFound,
                ..
            }
        ));
    }
}
