//! Data model shared by the capture, inference and controller crates.
//!
//! Everything here is plain data: frames are produced by a video source,
//! detections by a model backend, and both are handed to a rendering sink.

mod detection;
mod frame;

pub use detection::{BoundingBox, Detection};
pub use frame::{Frame, FrameError, RGB_CHANNELS};
