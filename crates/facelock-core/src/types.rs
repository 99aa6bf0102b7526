use facelock_hw::Region;
use serde::{Deserialize, Serialize};

/// Six-point eye contour: outer corner, upper-outer, upper-inner, inner corner,
/// lower-inner, lower-outer.
pub type EyeContour = [(f32, f32); 6];

/// Per-eye contours, when the detector provides dense landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeContours {
    pub left: EyeContour,
    pub right: EyeContour,
}

impl EyeContours {
    /// Eye aspect ratio for (left, right).
    pub fn aspect_ratios(&self) -> (f32, f32) {
        (eye_aspect_ratio(&self.left), eye_aspect_ratio(&self.right))
    }
}

/// Eye aspect ratio: mean vertical opening over horizontal width.
///
/// Returns 0.0 for a degenerate contour (zero width).
pub fn eye_aspect_ratio(eye: &EyeContour) -> f32 {
    let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    let width = dist(eye[0], eye[3]);
    if width <= f32::EPSILON {
        return 0.0;
    }
    (dist(eye[1], eye[5]) + dist(eye[2], eye[4])) / (2.0 * width)
}

/// Bounding box for a detected face (pixel coordinates), with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
    pub eyes: Option<EyeContours>,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            landmarks: None,
            eyes: None,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Centre in [0,1] frame coordinates.
    pub fn normalized_center(&self, frame_width: u32, frame_height: u32) -> (f32, f32) {
        let (cx, cy) = self.center();
        (
            cx / frame_width.max(1) as f32,
            cy / frame_height.max(1) as f32,
        )
    }

    /// Integer pixel region clamped to the frame.
    pub fn region(&self, frame_width: u32, frame_height: u32) -> Option<Region> {
        Region::from_rect(self.x, self.y, self.width, self.height, frame_width, frame_height)
    }
}

/// Face descriptor (fixed-length embedding) produced by the embedding extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when no value is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_eye() -> EyeContour {
        [(0.0, 0.0), (1.0, -1.5), (2.0, -1.5), (3.0, 0.0), (2.0, 1.5), (1.0, 1.5)]
    }

    #[test]
    fn test_eye_aspect_ratio_open() {
        // vertical 3.0 both sides, width 3.0 → EAR 1.0
        assert!((eye_aspect_ratio(&open_eye()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_eye_aspect_ratio_degenerate() {
        assert_eq!(eye_aspect_ratio(&[(1.0, 1.0); 6]), 0.0);
    }

    #[test]
    fn test_normalized_center() {
        let b = BoundingBox::new(270.0, 190.0, 100.0, 100.0, 0.9);
        let (cx, cy) = b.normalized_center(640, 480);
        assert!((cx - 0.5).abs() < 1e-6);
        assert!((cy - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_descriptor_finiteness() {
        assert!(Descriptor::new(vec![0.0, -1.0, 3.5]).is_finite());
        assert!(!Descriptor::new(vec![0.0, f32::NAN]).is_finite());
        assert!(!Descriptor::new(vec![f32::NEG_INFINITY]).is_finite());
    }

    #[test]
    fn test_region_clamps() {
        let b = BoundingBox::new(-10.0, -10.0, 50.0, 50.0, 0.9);
        let r = b.region(100, 100).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (0, 0, 40, 40));
    }
}
