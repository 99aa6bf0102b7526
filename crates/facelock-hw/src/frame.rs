//! Frame type and image statistics: luminance, contrast, edge energy, crops.

use std::time::Instant;

/// A captured grayscale camera frame with an optional aligned depth map.
///
/// Frames are immutable once captured; the pipeline shares them behind `Arc`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Depth samples covering the same field of view, possibly at a lower resolution.
    pub depth: Option<DepthMap>,
    pub timestamp: Instant,
    pub sequence: u64,
}

impl Frame {
    /// Build a frame stamped with the current monotonic time.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            depth: None,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Attach a depth map to this frame.
    pub fn with_depth(mut self, depth: DepthMap) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Check that the buffer matches the declared geometry.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::EmptyFrame);
        }
        let expected = self.pixel_count();
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }
        if let Some(depth) = &self.depth {
            depth.validate()?;
        }
        Ok(())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Copy the luma samples inside `region`.
    pub fn crop(&self, region: Region) -> Result<LumaPatch, FrameError> {
        self.validate()?;
        let region = region.clamp_to(self.width, self.height).ok_or(FrameError::EmptyRegion)?;

        let w = self.width as usize;
        let mut data = Vec::with_capacity(region.width as usize * region.height as usize);
        for y in region.y..region.y + region.height {
            let row = y as usize * w;
            let start = row + region.x as usize;
            data.extend_from_slice(&self.data[start..start + region.width as usize]);
        }

        Ok(LumaPatch {
            data,
            width: region.width,
            height: region.height,
        })
    }

    /// Depth samples for `region` (given in luma pixel coordinates), if a depth map is attached.
    pub fn crop_depth(&self, region: Region) -> Option<DepthPatch> {
        let depth = self.depth.as_ref()?;
        depth.crop_scaled(region, self.width, self.height)
    }
}

/// Per-pixel depth in metres. Non-finite or non-positive samples are invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub values: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl DepthMap {
    pub fn validate(&self) -> Result<(), FrameError> {
        let expected = self.width as usize * self.height as usize;
        if expected == 0 || self.values.len() != expected {
            return Err(FrameError::DepthMismatch {
                expected,
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    /// Crop a luma-space region, rescaling it to this map's resolution.
    pub fn crop_scaled(
        &self,
        region: Region,
        luma_width: u32,
        luma_height: u32,
    ) -> Option<DepthPatch> {
        if self.validate().is_err() || luma_width == 0 || luma_height == 0 {
            return None;
        }
        let sx = self.width as f32 / luma_width as f32;
        let sy = self.height as f32 / luma_height as f32;
        let scaled = Region::from_rect(
            region.x as f32 * sx,
            region.y as f32 * sy,
            region.width as f32 * sx,
            region.height as f32 * sy,
            self.width,
            self.height,
        )?;

        let w = self.width as usize;
        let mut values = Vec::with_capacity(scaled.width as usize * scaled.height as usize);
        for y in scaled.y..scaled.y + scaled.height {
            let row = y as usize * w;
            let start = row + scaled.x as usize;
            values.extend_from_slice(&self.values[start..start + scaled.width as usize]);
        }

        Some(DepthPatch {
            values,
            width: scaled.width,
            height: scaled.height,
        })
    }
}

/// Integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Round a floating-point rectangle to pixels, clamped to `bound_w` × `bound_h`.
    ///
    /// Returns `None` if nothing of the rectangle remains inside the bounds.
    pub fn from_rect(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        bound_w: u32,
        bound_h: u32,
    ) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return None;
        }
        let x0 = x.floor().clamp(0.0, bound_w as f32) as u32;
        let y0 = y.floor().clamp(0.0, bound_h as f32) as u32;
        let x1 = (x + width).ceil().clamp(0.0, bound_w as f32) as u32;
        let y1 = (y + height).ceil().clamp(0.0, bound_h as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    fn clamp_to(self, bound_w: u32, bound_h: u32) -> Option<Self> {
        Self::from_rect(
            self.x as f32,
            self.y as f32,
            self.width as f32,
            self.height as f32,
            bound_w,
            bound_h,
        )
    }
}

/// Grayscale crop of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaPatch {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Depth crop of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthPatch {
    pub values: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl DepthPatch {
    /// Samples that carry a usable depth reading.
    pub fn valid_samples(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied().filter(|v| v.is_finite() && *v > 0.0)
    }
}

/// Check if a frame is dark using an 8-bucket histogram.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Mean and standard deviation of luma samples, visiting every `stride`-th pixel.
pub fn luma_stats(gray: &[u8], stride: usize) -> (f32, f32) {
    let stride = stride.max(1);
    let mut n = 0usize;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for &p in gray.iter().step_by(stride) {
        let v = p as f64;
        sum += v;
        sum_sq += v * v;
        n += 1;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean as f32, variance.sqrt() as f32)
}

/// Mean absolute 4-neighbour Laplacian, an edge-energy proxy for focus.
///
/// Border pixels are skipped; `stride` subsamples both axes.
pub fn mean_abs_laplacian(gray: &[u8], width: u32, height: u32, stride: usize) -> f32 {
    let w = width as usize;
    let h = height as usize;
    if w < 3 || h < 3 || gray.len() < w * h {
        return 0.0;
    }
    let stride = stride.max(1);

    let mut total = 0.0f64;
    let mut count = 0usize;
    for y in (1..h - 1).step_by(stride) {
        for x in (1..w - 1).step_by(stride) {
            let c = gray[y * w + x] as i32;
            let lap = 4 * c
                - gray[y * w + x - 1] as i32
                - gray[y * w + x + 1] as i32
                - gray[(y - 1) * w + x] as i32
                - gray[(y + 1) * w + x] as i32;
            total += lap.unsigned_abs() as f64;
            count += 1;
        }
    }

    if count == 0 {
        0.0
    } else {
        (total / count as f64) as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has zero width or height")]
    EmptyFrame,
    #[error("depth map length mismatch: expected {expected}, got {actual}")]
    DepthMismatch { expected: usize, actual: usize },
    #[error("crop region lies outside the frame")]
    EmptyRegion,
    #[error("image conversion failed: {0}")]
    Conversion(String),
}
