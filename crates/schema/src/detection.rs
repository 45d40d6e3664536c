use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box covering a whole `width` x `height` frame.
    pub fn full_frame(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    /// Build from corner coordinates.
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// Restrict the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let x1 = self.x.clamp(0.0, w);
        let y1 = self.y.clamp(0.0, h);
        let x2 = (self.x + self.width).clamp(0.0, w);
        let y2 = (self.y + self.height).clamp(0.0, h);
        Self::from_corners(x1, y1, x2.max(x1), y2.max(y1))
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// A labelled region of interest produced by a model backend for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
    pub label: String,
    /// Always within `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(bounding_box: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            bounding_box,
            label: label.into(),
            confidence,
        }
    }

    /// `"label (87%)"`, the caption drawn next to the box.
    pub fn caption(&self) -> String {
        format!("{} ({}%)", self.label, (self.confidence * 100.0).round() as u32)
    }
}
