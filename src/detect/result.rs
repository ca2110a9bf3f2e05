use serde::{Deserialize, Serialize};

/// Bounding region of one prediction.
///
/// The service reports boxes in TensorFlow detection order,
/// `[y_min, x_min, y_max, x_max]`, normalized to 0..1 of the source frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub y_min: f64,
    pub x_min: f64,
    pub y_max: f64,
    pub x_max: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from(raw: [f64; 4]) -> Self {
        Self {
            y_min: raw[0],
            x_min: raw[1],
            y_max: raw[2],
            x_max: raw[3],
        }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.y_min, bbox.x_min, bbox.y_max, bbox.x_max]
    }
}

impl BoundingBox {
    /// Pixel edges `(left, top, right, bottom)` for a frame of the given size.
    ///
    /// Coordinates are clamped to the frame. Returns `None` for boxes with a
    /// non-finite coordinate or less than one pixel of width or height.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<(f64, f64, f64, f64)> {
        let raw = [self.y_min, self.x_min, self.y_max, self.x_max];
        if raw.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let (w, h) = (f64::from(width), f64::from(height));
        let scale = |v: f64, extent: f64| v.clamp(0.0, 1.0) * extent;
        let (x0, x1) = (scale(self.x_min, w), scale(self.x_max, w));
        let (y0, y1) = (scale(self.y_min, h), scale(self.y_max, h));
        let (left, right) = (x0.min(x1), x0.max(x1));
        let (top, bottom) = (y0.min(y1), y0.max(y1));
        if right - left < 1.0 || bottom - top < 1.0 {
            return None;
        }
        Some((left, top, right, bottom))
    }
}

/// One detected object instance as returned by the service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Object label (person, car, dog, ...).
    pub name: String,
    /// Raw service score (0.0-1.0).
    pub score: f64,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl Prediction {
    /// Confidence on the percent scale used by the configured threshold,
    /// rounded to one decimal place.
    pub fn confidence(&self) -> f64 {
        format_confidence(self.score)
    }
}

/// Convert a 0..1 service score to the percent scale (one decimal place).
pub fn format_confidence(score: f64) -> f64 {
    (score * 1000.0).round() / 10.0
}

/// Keep only predictions whose label equals `target` exactly, in service order.
pub fn filter_targets(predictions: &[Prediction], target: &str) -> Vec<Prediction> {
    predictions
        .iter()
        .filter(|prediction| prediction.name == target)
        .cloned()
        .collect()
}

/// Predictions from one frame plus the subset matching the configured target.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionResult {
    pub predictions: Vec<Prediction>,
    pub targets: Vec<Prediction>,
}

impl DetectionResult {
    pub fn new(predictions: Vec<Prediction>, target: &str) -> Self {
        let targets = filter_targets(&predictions, target);
        Self {
            predictions,
            targets,
        }
    }

    pub fn count(&self) -> usize {
        self.targets.len()
    }
}
