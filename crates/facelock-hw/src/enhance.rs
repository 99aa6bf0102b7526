//! Image enhancement applied to admitted frames before descriptor extraction.

use crate::frame::{Frame, FrameError};
use image::{imageops, GrayImage};

/// Which corrections to apply. Empty means "forward the frame untouched".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Enhancement {
    /// Additive luma offset, applied first.
    pub brighten: Option<i32>,
    /// Contrast stretch in percent (positive increases contrast).
    pub contrast: Option<f32>,
    /// Unsharp-mask sigma.
    pub sharpen: Option<f32>,
}

impl Enhancement {
    pub fn is_empty(&self) -> bool {
        self.brighten.is_none() && self.contrast.is_none() && self.sharpen.is_none()
    }
}

/// Threshold (in luma levels) below which unsharp masking leaves a pixel alone.
const UNSHARPEN_THRESHOLD: i32 = 4;

/// Apply `enhancement` to a copy of `frame`. Depth, timestamp and sequence are preserved.
pub fn enhance(frame: &Frame, enhancement: &Enhancement) -> Result<Frame, FrameError> {
    frame.validate()?;
    if enhancement.is_empty() {
        return Ok(frame.clone());
    }

    let mut img = GrayImage::from_raw(frame.width, frame.height, frame.data.clone())
        .ok_or_else(|| FrameError::Conversion("buffer does not match frame geometry".into()))?;

    if let Some(offset) = enhancement.brighten {
        img = imageops::brighten(&img, offset);
    }
    if let Some(percent) = enhancement.contrast {
        img = imageops::contrast(&img, percent);
    }
    if let Some(sigma) = enhancement.sharpen {
        img = imageops::unsharpen(&img, sigma, UNSHARPEN_THRESHOLD);
    }

    tracing::trace!(
        sequence = frame.sequence,
        brighten = ?enhancement.brighten,
        contrast = ?enhancement.contrast,
        sharpen = ?enhancement.sharpen,
        "frame enhanced"
    );

    Ok(Frame {
        data: img.into_raw(),
        width: frame.width,
        height: frame.height,
        depth: frame.depth.clone(),
        timestamp: frame.timestamp,
        sequence: frame.sequence,
    })
}
