//! HTTP MJPEG streams for IP cameras and drones.
//!
//! A `multipart/*` response is read as a continuous stream of JPEGs; any
//! other content type is treated as a snapshot endpoint and polled at the
//! requested frame rate. Reading happens on a dedicated thread.

use crate::decoder::decode_jpeg;
use crate::descriptor::SourceKind;
use crate::error::{SourceError, UnavailableReason};
use crate::platform::{CaptureFormat, FrameProducer, StreamConnector};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use schema::Frame;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;
const FRAME_QUEUE: usize = 2;

#[derive(Debug, Clone)]
pub struct MjpegConnector {
    agent: ureq::Agent,
}

impl MjpegConnector {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(connect_timeout)
                .timeout_read(read_timeout)
                .build(),
        }
    }
}

impl Default for MjpegConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5))
    }
}

pub(crate) fn reason_for_status(code: u16) -> UnavailableReason {
    match code {
        401 | 403 => UnavailableReason::PermissionDenied,
        404 => UnavailableReason::NotFound,
        _ => UnavailableReason::Unreachable,
    }
}

fn map_http_error(id: &str, err: ureq::Error) -> SourceError {
    match err {
        ureq::Error::Status(code, _) => {
            SourceError::unavailable(id, reason_for_status(code), format!("HTTP {code}"))
        }
        ureq::Error::Transport(t) => SourceError::unavailable(id, UnavailableReason::Unreachable, t),
    }
}

enum HttpStream {
    Multipart(MjpegStream),
    Snapshot { agent: ureq::Agent, url: String },
}

fn open_stream(agent: ureq::Agent, id: &str, url: &str) -> Result<HttpStream, SourceError> {
    let response = agent.get(url).call().map_err(|e| map_http_error(id, e))?;
    let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();

    if content_type.contains("multipart") {
        Ok(HttpStream::Multipart(MjpegStream::new(Box::new(response.into_reader()))))
    } else {
        Ok(HttpStream::Snapshot {
            agent,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl StreamConnector for MjpegConnector {
    async fn connect(
        &self,
        id: &str,
        kind: SourceKind,
        url: &Url,
        format: CaptureFormat,
    ) -> Result<Box<dyn FrameProducer>, SourceError> {
        let agent = self.agent.clone();
        let owned_id = id.to_string();
        let owned_url = url.to_string();

        let stream = tokio::task::spawn_blocking(move || open_stream(agent, &owned_id, &owned_url))
            .await
            .map_err(|e| SourceError::Capture(format!("connect task failed: {e}")))??;

        let (tx, rx) = mpsc::channel(FRAME_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let poll_interval = Duration::from_secs_f64(1.0 / format.fps.max(1) as f64);

        let reader = {
            let stop = Arc::clone(&stop);
            let id = id.to_string();
            std::thread::Builder::new()
                .name(format!("mjpeg-{id}"))
                .spawn(move || read_loop(stream, tx, stop, poll_interval, &id))
                .map_err(|e| SourceError::Capture(format!("spawn reader thread: {e}")))?
        };

        tracing::info!(id, kind = %kind, url = %url, "Connected to MJPEG stream");

        Ok(Box::new(MjpegCapture {
            rx,
            stop,
            reader: Some(reader),
        }))
    }
}

fn read_loop(
    mut stream: HttpStream,
    tx: mpsc::Sender<Result<Frame, SourceError>>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    id: &str,
) {
    let mut sequence = 0u64;

    while !stop.load(Ordering::Relaxed) {
        let jpeg = match &mut stream {
            HttpStream::Multipart(s) => s.read_next_jpeg(),
            HttpStream::Snapshot { agent, url } => {
                std::thread::sleep(poll_interval);
                fetch_single_jpeg(agent, url)
            }
        };

        let result = jpeg
            .and_then(|bytes| decode_jpeg(&bytes, sequence))
            .map_err(|e| SourceError::Capture(format!("{e:#}")));
        let failed = result.is_err();

        if tx.blocking_send(result).is_err() || failed {
            break;
        }
        sequence += 1;
    }

    tracing::debug!(id, frames = sequence, "MJPEG reader stopped");
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> anyhow::Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {url}"))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

/// Splits a multipart body into JPEGs by scanning SOI/EOI markers.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(crate) fn read_next_jpeg(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            // Keep a trailing byte so a marker split across reads survives.
            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 1;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// Byte range of the first complete JPEG (`FFD8` .. `FFD9`) in `buffer`.
pub(crate) fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

struct MjpegCapture {
    rx: mpsc::Receiver<Result<Frame, SourceError>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl FrameProducer for MjpegCapture {
    async fn next_frame(&mut self) -> Result<Frame, SourceError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(SourceError::Capture("stream closed".to_string())),
        }
    }

    async fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.rx.close();
        // Unblock a reader waiting on a full queue.
        while self.rx.try_recv().is_ok() {}

        if let Some(reader) = self.reader.take()
            && let Err(e) = tokio::task::spawn_blocking(move || reader.join()).await
        {
            tracing::warn!(error = %e, "MJPEG reader join failed");
        }
    }
}

impl Drop for MjpegCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageEncoder, codecs::jpeg::JpegEncoder};
    use std::io::{Cursor, Write};
    use std::net::TcpListener;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let pixels = vec![90u8; (width * height * 3) as usize];
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .write_image(&pixels, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn multipart_body(frames: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for _ in 0..frames {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&jpeg(16, 8));
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    /// One-shot HTTP server answering a single request with `head` + `body`.
    fn serve_once(head: &'static str, body: Vec<u8>) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut socket, _)) = listener.accept() {
                let mut request = [0u8; 1024];
                let _ = socket.read(&mut request);
                let _ = socket.write_all(head.as_bytes());
                let _ = socket.write_all(&body);
            }
        });
        Url::parse(&format!("http://{addr}/stream")).unwrap()
    }

    // ==================== marker scanning ====================

    #[test]
    fn finds_bounds_after_junk() {
        let buffer = [0x00, 0x11, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x33];
        assert_eq!(find_jpeg_bounds(&buffer), Some((2, 8)));
    }

    #[test]
    fn incomplete_jpeg_has_no_bounds() {
        assert_eq!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00, 0xFF]), None);
        assert_eq!(find_jpeg_bounds(&[0x00, 0xD9]), None);
    }

    #[test]
    fn stream_splits_multipart_body() {
        let mut stream = MjpegStream::new(Box::new(Cursor::new(multipart_body(2))));

        let first = stream.read_next_jpeg().unwrap();
        let second = stream.read_next_jpeg().unwrap();

        assert_eq!(&first[..2], &[0xFF, 0xD8]);
        assert_eq!(&second[second.len() - 2..], &[0xFF, 0xD9]);
        assert!(stream.read_next_jpeg().is_err(), "Body exhausted");
    }

    // ==================== connection ====================

    #[test]
    fn status_codes_map_to_reasons() {
        assert_eq!(reason_for_status(401), UnavailableReason::PermissionDenied);
        assert_eq!(reason_for_status(403), UnavailableReason::PermissionDenied);
        assert_eq!(reason_for_status(404), UnavailableReason::NotFound);
        assert_eq!(reason_for_status(500), UnavailableReason::Unreachable);
    }

    #[tokio::test]
    async fn unauthorized_stream_is_permission_denied() {
        let url = serve_once(
            "HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Vec::new(),
        );

        let err = MjpegConnector::default()
            .connect("ip-1", SourceKind::IpStream, &url, CaptureFormat::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            SourceError::Unavailable {
                reason: UnavailableReason::PermissionDenied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let err = MjpegConnector::default()
            .connect("drone-1", SourceKind::DroneStream, &url, CaptureFormat::default())
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            SourceError::Unavailable {
                reason: UnavailableReason::Unreachable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn multipart_stream_delivers_decoded_frames() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary=frame\r\nConnection: close\r\n\r\n",
            multipart_body(3),
        );

        let mut capture = MjpegConnector::default()
            .connect("ip-1", SourceKind::IpStream, &url, CaptureFormat::default())
            .await
            .unwrap();

        let first = capture.next_frame().await.unwrap();
        let second = capture.next_frame().await.unwrap();

        assert_eq!((first.width(), first.height()), (16, 8));
        assert_eq!(second.sequence(), 1);

        capture.close().await;
        assert!(capture.next_frame().await.is_err());
    }
}
