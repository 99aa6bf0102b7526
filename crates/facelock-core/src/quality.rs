//! Frame quality gate.
//!
//! Scores each frame's usability from luminance, edge energy, contrast, face
//! size and positional stability, and decides whether the frame is worth
//! forwarding to descriptor extraction.

use crate::types::BoundingBox;
use facelock_hw::frame::{is_dark_frame, luma_stats, mean_abs_laplacian};
use facelock_hw::{Enhancement, Frame, FrameError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const WEIGHT_BRIGHTNESS: f32 = 0.2;
const WEIGHT_SHARPNESS: f32 = 0.3;
const WEIGHT_CONTRAST: f32 = 0.2;
const WEIGHT_FACE_SIZE: f32 = 0.2;
const WEIGHT_STABILITY: f32 = 0.1;

/// Luma standard deviation that counts as full contrast.
const CONTRAST_NORM: f32 = 64.0;
/// Mean absolute Laplacian that counts as fully sharp.
const SHARPNESS_NORM: f32 = 32.0;
/// Face width (as a fraction of frame width) that counts as full size.
const FACE_SIZE_FULL: f32 = 0.5;
/// Normalised centre displacement at which stability reaches zero.
const STABILITY_MAX_SHIFT: f32 = 0.05;

/// Enhancement kicks in below these component scores.
const ENHANCE_BRIGHTNESS_BELOW: f32 = 0.35;
const ENHANCE_CONTRAST_BELOW: f32 = 0.4;
const ENHANCE_SHARPNESS_BELOW: f32 = 0.5;

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Per-feature floors and analysis cost knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub min_brightness: f32,
    pub min_sharpness: f32,
    pub min_contrast: f32,
    pub min_face_size: f32,
    pub min_overall: f32,
    /// Analyse every n-th pixel. 1 = full resolution.
    pub analysis_stride: usize,
    /// Fraction of near-black pixels above which a frame is dark.
    pub dark_frame_pct: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_brightness: 0.3,
            min_sharpness: 0.4,
            min_contrast: 0.3,
            min_face_size: 0.15,
            min_overall: 0.4,
            analysis_stride: 1,
            dark_frame_pct: 0.95,
        }
    }
}

/// Derived usability features for one frame, all in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameQuality {
    pub brightness: f32,
    pub sharpness: f32,
    pub contrast: f32,
    pub face_size: f32,
    pub stability: f32,
    pub overall: f32,
    pub is_acceptable: bool,
}

impl FrameQuality {
    /// The score given to frames whose analysis failed.
    pub fn rejected() -> Self {
        Self {
            brightness: 0.0,
            sharpness: 0.0,
            contrast: 0.0,
            face_size: 0.0,
            stability: 0.0,
            overall: 0.0,
            is_acceptable: false,
        }
    }
}

/// Stateful gate: remembers the previous face centre to score stability.
#[derive(Debug)]
pub struct QualityGate {
    config: QualityConfig,
    last_center: Option<(f32, f32)>,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            last_center: None,
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Score a frame. Analysis failures yield [`FrameQuality::rejected`] and are never propagated.
    pub fn evaluate(&mut self, frame: &Frame, face: Option<&BoundingBox>) -> FrameQuality {
        match self.try_evaluate(frame, face) {
            Ok(q) => q,
            Err(err) => {
                tracing::debug!(
                    sequence = frame.sequence,
                    error = %err,
                    "quality analysis failed; skipping frame"
                );
                FrameQuality::rejected()
            }
        }
    }

    pub fn try_evaluate(
        &mut self,
        frame: &Frame,
        face: Option<&BoundingBox>,
    ) -> Result<FrameQuality, QualityError> {
        frame.validate()?;
        let stride = self.config.analysis_stride.max(1);

        let (mean, stddev) = luma_stats(&frame.data, stride);
        let brightness = (mean / 255.0).clamp(0.0, 1.0);

        if is_dark_frame(&frame.data, self.config.dark_frame_pct) {
            tracing::trace!(sequence = frame.sequence, "dark frame");
            return Ok(FrameQuality {
                brightness,
                ..FrameQuality::rejected()
            });
        }

        let contrast = (stddev / CONTRAST_NORM).clamp(0.0, 1.0);
        let edges = mean_abs_laplacian(&frame.data, frame.width, frame.height, stride);
        let sharpness = (edges / SHARPNESS_NORM).clamp(0.0, 1.0);

        let (face_size, stability) = match face {
            Some(face) => {
                let size = (face.width / frame.width as f32 / FACE_SIZE_FULL).clamp(0.0, 1.0);
                let center = face.normalized_center(frame.width, frame.height);
                let stability = match self.last_center.replace(center) {
                    Some(prev) => {
                        let shift =
                            ((center.0 - prev.0).powi(2) + (center.1 - prev.1).powi(2)).sqrt();
                        1.0 - (shift / STABILITY_MAX_SHIFT).min(1.0)
                    }
                    None => 0.0,
                };
                (size, stability)
            }
            None => {
                self.last_center = None;
                (0.0, 0.0)
            }
        };

        let overall = brightness * WEIGHT_BRIGHTNESS
            + sharpness * WEIGHT_SHARPNESS
            + contrast * WEIGHT_CONTRAST
            + face_size * WEIGHT_FACE_SIZE
            + stability * WEIGHT_STABILITY;

        let c = &self.config;
        let is_acceptable = brightness > c.min_brightness
            && sharpness > c.min_sharpness
            && contrast > c.min_contrast
            && face_size > c.min_face_size
            && overall > c.min_overall;

        Ok(FrameQuality {
            brightness,
            sharpness,
            contrast,
            face_size,
            stability,
            overall,
            is_acceptable,
        })
    }

    /// Corrections worth applying before extraction. Never affects `is_acceptable`.
    pub fn enhancement_for(&self, quality: &FrameQuality) -> Enhancement {
        Enhancement {
            brighten: (quality.brightness < ENHANCE_BRIGHTNESS_BELOW)
                .then(|| ((0.5 - quality.brightness) * 255.0).round() as i32),
            contrast: (quality.contrast < ENHANCE_CONTRAST_BELOW).then_some(30.0),
            sharpen: (quality.sharpness < ENHANCE_SHARPNESS_BELOW).then_some(1.0),
        }
    }

    /// Forget positional history (new session).
    pub fn reset(&mut self) {
        self.last_center = None;
    }
}
