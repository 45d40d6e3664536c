//! Capabilities the platform layer provides to the source registry.

use crate::descriptor::SourceKind;
use crate::error::SourceError;
use async_trait::async_trait;
use schema::Frame;
use url::Url;

/// Requested capture geometry and rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

/// A camera found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDevice {
    pub handle: String,
    pub name: String,
}

/// An open capture delivering decoded frames.
#[async_trait]
pub trait FrameProducer: Send {
    async fn next_frame(&mut self) -> Result<Frame, SourceError>;

    /// Release the device or connection. Returns once it is fully released.
    async fn close(&mut self);
}

#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Read-only probe of attached cameras, in platform order.
    async fn enumerate(&self) -> Result<Vec<LocalDevice>, SourceError>;

    async fn open(
        &self,
        id: &str,
        handle: &str,
        format: CaptureFormat,
    ) -> Result<Box<dyn FrameProducer>, SourceError>;
}

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(
        &self,
        id: &str,
        kind: SourceKind,
        url: &Url,
        format: CaptureFormat,
    ) -> Result<Box<dyn FrameProducer>, SourceError>;
}
