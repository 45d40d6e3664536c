use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Bytes per pixel of a decoded frame (packed RGB8).
pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame has zero area ({width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },

    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// One decoded image captured from a video source.
///
/// Pixels are packed RGB8, row-major, without padding. The buffer is shared so
/// a frame can be handed to the model and the rendering sink without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
    captured_at: Instant,
}

impl Frame {
    pub fn new(sequence: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }

        let expected = width as usize * height as usize * RGB_CHANNELS;
        if pixels.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            sequence,
            width,
            height,
            pixels: pixels.into(),
            captured_at: Instant::now(),
        })
    }

    /// Uniform frame of a single colour, mostly useful for tests and placeholders.
    pub fn solid(sequence: u64, width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, FrameError> {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * RGB_CHANNELS)
            .collect();
        Self::new(sequence, width, height, pixels)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// RGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_exact_rgb_buffer() {
        let frame = Frame::new(3, 2, 2, vec![0u8; 12]).unwrap();
        assert_eq!(frame.sequence(), 3);
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.pixels().len(), 12);
    }

    #[test]
    fn new_rejects_size_mismatch() {
        let err = Frame::new(0, 10, 10, vec![0u8; 200]).unwrap_err();
        assert_eq!(
            err,
            FrameError::SizeMismatch {
                expected: 300,
                actual: 200
            }
        );
        assert!(
            err.to_string().contains("mismatch"),
            "Error should mention mismatch"
        );
    }

    #[test]
    fn new_rejects_zero_area() {
        assert_eq!(
            Frame::new(0, 0, 480, Vec::new()).unwrap_err(),
            FrameError::EmptyDimensions {
                width: 0,
                height: 480
            }
        );
    }

    #[test]
    fn solid_fills_every_pixel() {
        let frame = Frame::solid(0, 4, 3, [10, 20, 30]).unwrap();
        assert_eq!(frame.pixel(0, 0), Some([10, 20, 30]));
        assert_eq!(frame.pixel(3, 2), Some([10, 20, 30]));
        assert_eq!(frame.pixel(4, 0), None, "x out of bounds");
        assert_eq!(frame.pixel(0, 3), None, "y out of bounds");
    }

    #[test]
    fn clones_share_the_pixel_buffer() {
        let frame = Frame::solid(0, 64, 64, [1, 2, 3]).unwrap();
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.pixels().as_ptr(), copy.pixels().as_ptr()));
    }
}
