//! Liveness fusion.
//!
//! Runs independent anti-spoofing detectors over the current (and, where
//! needed, previous) frame signals and fuses whichever ones apply into a
//! single confidence. A detector whose prerequisite data is missing does not
//! vote; the remaining weights are renormalised over the methods present.
//!
//! # Threat Coverage
//!
//! - **Depth:** flat photographs and screens held to a depth-capable camera.
//! - **Texture:** low-detail reprints and heavily compressed replays.
//! - **Motion / blink:** static images; requires a previous frame.

use crate::types::{BoundingBox, EyeContours};
use facelock_hw::frame::mean_abs_laplacian;
use facelock_hw::{DepthPatch, LumaPatch};
use serde::{Deserialize, Serialize};

const WEIGHT_DEPTH: f32 = 0.35;
const WEIGHT_TEXTURE: f32 = 0.25;
const WEIGHT_MOTION: f32 = 0.20;
const WEIGHT_BLINK: f32 = 0.15;
const WEIGHT_FACE_QUALITY: f32 = 0.05;

/// Per-eye EAR change that counts as a blink.
const BLINK_DELTA: f32 = 0.15;
const BLINK_BILATERAL: f32 = 1.0;
const BLINK_UNILATERAL: f32 = 0.6;
const BLINK_NONE: f32 = 0.2;

/// Depth standard deviation (metres) across the face that counts as fully 3-D.
const DEPTH_RELIEF_FULL: f32 = 0.02;
/// Fraction of valid depth samples below which the depth reading is untrustworthy.
const DEPTH_MIN_VALID_FRACTION: f32 = 0.5;

/// Mean absolute Laplacian of the face crop that counts as full skin texture.
const TEXTURE_NORM: f32 = 12.0;
/// Fraction of saturated pixels that suggests screen glare.
const GLARE_FRACTION: f32 = 0.05;

/// Mean eye displacement (in face widths) below which a face is suspiciously static.
const MOTION_STATIC: f32 = 0.002;
/// Displacement at which micro-motion is fully convincing.
const MOTION_FULL: f32 = 0.01;
/// Displacement above which the subject jumped rather than moved naturally.
const MOTION_JUMP: f32 = 0.2;

/// The individual detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LivenessMethod {
    Depth,
    Texture,
    Motion,
    Blink,
    FaceQuality,
}

impl LivenessMethod {
    pub fn weight(self) -> f32 {
        match self {
            LivenessMethod::Depth => WEIGHT_DEPTH,
            LivenessMethod::Texture => WEIGHT_TEXTURE,
            LivenessMethod::Motion => WEIGHT_MOTION,
            LivenessMethod::Blink => WEIGHT_BLINK,
            LivenessMethod::FaceQuality => WEIGHT_FACE_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Fused confidence required for `is_live`.
    pub threshold: f32,
    pub depth: bool,
    pub texture: bool,
    pub motion: bool,
    pub blink: bool,
    pub face_quality: bool,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            depth: true,
            texture: true,
            motion: true,
            blink: true,
            face_quality: true,
        }
    }
}

impl LivenessConfig {
    fn enabled(&self, method: LivenessMethod) -> bool {
        match method {
            LivenessMethod::Depth => self.depth,
            LivenessMethod::Texture => self.texture,
            LivenessMethod::Motion => self.motion,
            LivenessMethod::Blink => self.blink,
            LivenessMethod::FaceQuality => self.face_quality,
        }
    }
}

/// What one frame contributes to liveness analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessSignals {
    pub face: BoundingBox,
    pub luma: Option<LumaPatch>,
    pub depth: Option<DepthPatch>,
    /// Overall tracked-face quality in [0,1].
    pub face_quality: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessResult {
    pub is_live: bool,
    pub confidence: f32,
    /// Methods that contributed, with their individual scores.
    pub methods: Vec<(LivenessMethod, f32)>,
}

impl LivenessResult {
    pub fn contributed(&self, method: LivenessMethod) -> bool {
        self.methods.iter().any(|(m, _)| *m == method)
    }
}

/// Fuse detector scores for `current`, using `previous` for the temporal detectors.
pub fn assess(
    config: &LivenessConfig,
    current: &LivenessSignals,
    previous: Option<&LivenessSignals>,
) -> LivenessResult {
    let candidates = [
        (LivenessMethod::Depth, current.depth.as_ref().map(depth_score)),
        (LivenessMethod::Texture, current.luma.as_ref().map(texture_score)),
        (LivenessMethod::Motion, previous.and_then(|p| motion_score(&p.face, &current.face))),
        (
            LivenessMethod::Blink,
            previous.and_then(|p| blink_score(p.face.eyes.as_ref()?, current.face.eyes.as_ref()?)),
        ),
        (LivenessMethod::FaceQuality, current.face_quality.map(|q| q.clamp(0.0, 1.0))),
    ];

    let methods: Vec<(LivenessMethod, f32)> = candidates
        .into_iter()
        .filter(|(m, _)| config.enabled(*m))
        .filter_map(|(m, score)| score.map(|s| (m, s)))
        .collect();

    let total_weight: f32 = methods.iter().map(|(m, _)| m.weight()).sum();
    if methods.is_empty() || total_weight <= 0.0 {
        return LivenessResult {
            is_live: false,
            confidence: 0.0,
            methods,
        };
    }

    let weighted = methods.iter().map(|(m, s)| m.weight() * s).sum::<f32>();
    let confidence = (weighted / total_weight).clamp(0.0, 1.0);

    LivenessResult {
        is_live: confidence >= config.threshold,
        confidence,
        methods,
    }
}

/// Stateful wrapper that remembers the previous frame's signals within a session.
#[derive(Debug)]
pub struct LivenessFusion {
    config: LivenessConfig,
    previous: Option<LivenessSignals>,
}

impl LivenessFusion {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Assess `current` against the previously seen frame, then remember it.
    pub fn assess(&mut self, current: LivenessSignals) -> LivenessResult {
        let result = assess(&self.config, &current, self.previous.as_ref());
        tracing::debug!(
            confidence = result.confidence,
            is_live = result.is_live,
            methods = ?result.methods.iter().map(|(m, _)| *m).collect::<Vec<_>>(),
            "liveness assessed"
        );
        self.previous = Some(current);
        result
    }

    /// Forget temporal state. Must be called when a session ends.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn has_history(&self) -> bool {
        self.previous.is_some()
    }
}

fn depth_score(patch: &DepthPatch) -> f32 {
    let valid: Vec<f32> = patch.valid_samples().collect();
    let min_valid = patch.values.len() as f32 * DEPTH_MIN_VALID_FRACTION;
    if patch.values.is_empty() || (valid.len() as f32) < min_valid {
        return 0.0;
    }
    let n = valid.len() as f32;
    let mean = valid.iter().sum::<f32>() / n;
    let std = (valid.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n).sqrt();
    (std / DEPTH_RELIEF_FULL).clamp(0.0, 1.0)
}

fn texture_score(patch: &LumaPatch) -> f32 {
    if patch.data.is_empty() {
        return 0.0;
    }
    let laplacian = mean_abs_laplacian(&patch.data, patch.width, patch.height, 1);
    let detail = (laplacian / TEXTURE_NORM).clamp(0.0, 1.0);
    let saturated =
        patch.data.iter().filter(|&&p| p == u8::MAX).count() as f32 / patch.data.len() as f32;
    if saturated > GLARE_FRACTION {
        detail * 0.5
    } else {
        detail
    }
}

fn motion_score(previous: &BoundingBox, current: &BoundingBox) -> Option<f32> {
    let prev = previous.landmarks?;
    let curr = current.landmarks?;
    let scale = current.width.max(f32::EPSILON);

    let disp = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();
    let mean = (disp(prev[0], curr[0]) + disp(prev[1], curr[1])) / 2.0 / scale;

    let score = if mean < MOTION_STATIC {
        0.1
    } else if mean > MOTION_JUMP {
        0.5
    } else {
        (mean / MOTION_FULL).min(1.0)
    };
    Some(score)
}

fn blink_score(previous: &EyeContours, current: &EyeContours) -> Option<f32> {
    let (pl, pr) = previous.aspect_ratios();
    let (cl, cr) = current.aspect_ratios();
    let left = (cl - pl).abs() > BLINK_DELTA;
    let right = (cr - pr).abs() > BLINK_DELTA;
    Some(match (left, right) {
        (true, true) => BLINK_BILATERAL,
        (true, false) | (false, true) => BLINK_UNILATERAL,
        (false, false) => BLINK_NONE,
    })
}
