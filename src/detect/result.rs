use serde::{Deserialize, Serialize};

/// Axis-aligned box in native video pixel coordinates.
///
/// Serialized as `[x, y, width, height]`, the layout detection models report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

impl From<[f32; 4]> for BBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// One recognized object instance for a single frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    /// Confidence in `[0, 1]`.
    pub score: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(class: impl Into<String>, score: f32, bbox: BBox) -> Self {
        Self {
            class: class.into(),
            score,
            bbox,
        }
    }

    /// Confidence as a rounded percentage, as shown in overlay labels.
    pub fn percent(&self) -> u32 {
        (self.score * 100.0).round().clamp(0.0, 100.0) as u32
    }
}
