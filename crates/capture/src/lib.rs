//! Video sources: descriptors, the platform capture capabilities, the
//! providers that implement them, and the registry that owns the single open
//! capture.

pub mod decoder;
pub mod descriptor;
#[cfg(feature = "v4l2")]
pub mod device;
pub mod error;
pub mod mjpeg;
pub mod platform;
pub mod registry;
pub mod synthetic;

pub use decoder::{FrameDecoder, MjpegDecoder, YuyvDecoder, decode_jpeg};
pub use descriptor::{Locator, SourceDescriptor, SourceKind};
#[cfg(feature = "v4l2")]
pub use device::{PixelFormat, V4lDevices};
pub use error::{SourceError, UnavailableReason};
pub use mjpeg::MjpegConnector;
pub use platform::{CaptureFormat, DeviceProvider, FrameProducer, LocalDevice, StreamConnector};
pub use registry::SourceRegistry;
pub use synthetic::SyntheticDevices;
