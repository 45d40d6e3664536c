//! Video4Linux2 cameras.
//!
//! Each open camera is owned by a capture thread that dequeues mmap buffers,
//! decodes them and hands frames to the async side over a bounded channel.

use crate::decoder::{FrameDecoder, MjpegDecoder, YuyvDecoder};
use crate::error::{SourceError, UnavailableReason};
use crate::platform::{CaptureFormat, DeviceProvider, FrameProducer, LocalDevice};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use common::retry::retry_with_backoff;
use schema::Frame;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use v4l::{
    Device, FourCC,
    buffer::Type,
    io::{mmap::Stream, traits::CaptureStream},
    video::Capture,
};

const BUFFER_COUNT: u32 = 4;
const FRAME_QUEUE: usize = 2;

const FOURCC_YUYV: FourCC = FourCC { repr: *b"YUYV" };
const FOURCC_MJPG: FourCC = FourCC { repr: *b"MJPG" };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
    Mjpeg,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Yuyv => FOURCC_YUYV,
            PixelFormat::Mjpeg => FOURCC_MJPG,
        }
    }

    fn decoder(self) -> Box<dyn FrameDecoder> {
        match self {
            PixelFormat::Yuyv => Box::new(YuyvDecoder),
            PixelFormat::Mjpeg => Box::new(MjpegDecoder),
        }
    }
}

/// Prefer YUYV (cheaper decode), fall back to MJPEG.
fn select_format(device: &Device) -> Result<PixelFormat> {
    let formats = device.enum_formats()?;

    for fmt in &formats {
        tracing::debug!("  {:?}: {}", fmt.fourcc, fmt.description);
    }

    if formats.iter().any(|f| f.fourcc == FOURCC_YUYV) {
        return Ok(PixelFormat::Yuyv);
    }
    if formats.iter().any(|f| f.fourcc == FOURCC_MJPG) {
        return Ok(PixelFormat::Mjpeg);
    }

    Err(anyhow!(
        "Camera supports neither YUYV nor MJPEG - available: {:?}",
        formats.iter().map(|f| f.fourcc).collect::<Vec<_>>()
    ))
}

fn unavailable_from_io(id: &str, err: &io::Error) -> SourceError {
    let reason = match err.kind() {
        io::ErrorKind::PermissionDenied => UnavailableReason::PermissionDenied,
        io::ErrorKind::NotFound => UnavailableReason::NotFound,
        _ if err.raw_os_error() == Some(16) => UnavailableReason::Busy, // EBUSY
        _ => UnavailableReason::NotFound,
    };
    SourceError::unavailable(id, reason, err)
}

/// Open and configure a device. Busy devices are retried with backoff.
fn open_configured(
    id: &str,
    handle: &str,
    format: CaptureFormat,
) -> Result<(Device, u32, u32, PixelFormat), SourceError> {
    let device = retry_with_backoff(
        || {
            let device = Device::with_path(handle)?;
            device.query_caps()?;
            Ok::<_, io::Error>(device)
        },
        3,
        200,
        "Camera open",
    )
    .map_err(|e| unavailable_from_io(id, &e))?;

    let configure = || -> Result<(u32, u32, PixelFormat)> {
        let caps = device.query_caps()?;
        tracing::info!("Camera opened: {} ({})", caps.card, caps.driver);

        let pixel_format = select_format(&device)?;
        let mut fmt = device.format()?;
        fmt.fourcc = pixel_format.fourcc();
        fmt.width = format.width;
        fmt.height = format.height;
        let fmt = device.set_format(&fmt).context("set capture format")?;

        tracing::info!(
            "Capture format: {}x{} {:?} ({:?})",
            fmt.width,
            fmt.height,
            fmt.fourcc,
            pixel_format
        );
        Ok((fmt.width, fmt.height, pixel_format))
    };

    let (width, height, pixel_format) = configure().map_err(|e| {
        SourceError::unavailable(id, UnavailableReason::NotFound, format!("{e:#}"))
    })?;
    Ok((device, width, height, pixel_format))
}

/// Cameras exposed through `/dev/video*`.
#[derive(Debug, Clone, Default)]
pub struct V4lDevices;

#[async_trait]
impl DeviceProvider for V4lDevices {
    async fn enumerate(&self) -> Result<Vec<LocalDevice>, SourceError> {
        let devices = tokio::task::spawn_blocking(|| {
            v4l::context::enum_devices()
                .into_iter()
                .filter(|node| {
                    Device::with_path(node.path())
                        .and_then(|d| d.query_caps())
                        .map(|caps| {
                            caps.capabilities
                                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                        })
                        .unwrap_or(false)
                })
                .map(|node| LocalDevice {
                    handle: node.path().display().to_string(),
                    name: node
                        .name()
                        .unwrap_or_else(|| format!("Camera {}", node.index())),
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| SourceError::Capture(format!("device enumeration failed: {e}")))?;

        tracing::debug!(count = devices.len(), "Enumerated V4L2 capture devices");
        Ok(devices)
    }

    async fn open(
        &self,
        id: &str,
        handle: &str,
        format: CaptureFormat,
    ) -> Result<Box<dyn FrameProducer>, SourceError> {
        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let stop = Arc::clone(&stop);
            let id = id.to_string();
            let handle = handle.to_string();
            std::thread::Builder::new()
                .name(format!("v4l-{id}"))
                .spawn(move || capture_thread(&id, &handle, format, tx, ready_tx, stop))
                .map_err(|e| SourceError::Capture(format!("spawn capture thread: {e}")))?
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(Box::new(V4lCapture {
                rx,
                stop,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                Err(e)
            }
            Err(_) => Err(SourceError::Capture("capture thread exited during open".into())),
        }
    }
}

fn capture_thread(
    id: &str,
    handle: &str,
    format: CaptureFormat,
    tx: mpsc::Sender<Result<Frame, SourceError>>,
    ready: oneshot::Sender<Result<(), SourceError>>,
    stop: Arc<AtomicBool>,
) {
    let (device, width, height, pixel_format) = match open_configured(id, handle, format) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(unavailable_from_io(id, &e)));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut decoder = pixel_format.decoder();
    let mut sequence = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let result = match stream.next() {
            Ok((data, _meta)) => decoder
                .decode(data, width, height, sequence)
                .map_err(|e| SourceError::Capture(format!("{e:#}"))),
            Err(e) => Err(SourceError::Capture(e.to_string())),
        };

        if tx.blocking_send(result).is_err() {
            break;
        }
        sequence += 1;
    }

    // Stream and device drop here, releasing the camera.
    tracing::debug!(id, frames = sequence, "Capture thread stopped");
}

struct V4lCapture {
    rx: mpsc::Receiver<Result<Frame, SourceError>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

#[async_trait]
impl FrameProducer for V4lCapture {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(SourceError::Capture("capture closed".to_string())),
        }
    }

    async fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.rx.close();
        while self.rx.try_recv().is_ok() {}

        if let Some(thread) = self.thread.take()
            && let Err(e) = tokio::task::spawn_blocking(move || thread.join()).await
        {
            tracing::warn!(error = %e, "Capture thread join failed");
        }
    }
}

impl Drop for V4lCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.rx.close();
    }
}
