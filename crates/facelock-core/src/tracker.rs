//! Face tracking across frames.
//!
//! Associates per-frame detections with tracked faces by nearest normalised
//! centre, declares a face stable once its recent positions stop moving, and
//! turns the primary face's state into a single user guidance message.

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum normalised centre distance for a detection to continue a track.
    pub match_distance: f32,
    /// Number of positions that must be still before a face is stable.
    pub stability_window: usize,
    /// Positional variance (x + y, normalised coordinates) below which a face is still.
    pub stability_variance: f32,
    /// Recompute face quality every n updates.
    pub quality_interval: u32,
    pub max_tracked_faces: usize,
    /// Frames an unmatched face survives when more than one face may be tracked.
    pub lost_timeout_frames: u64,
    /// Face width as a fraction of frame width.
    pub min_face_fraction: f32,
    pub max_face_fraction: f32,
    /// Allowed normalised offset of the face centre from the frame centre, per axis.
    pub center_tolerance: f32,
    /// Nose offset from the eye midpoint, in eye distances.
    pub max_yaw: f32,
    pub max_roll_degrees: f32,
    pub min_eye_aspect_ratio: f32,
    pub min_lighting: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_distance: 0.1,
            stability_window: 5,
            stability_variance: 0.001,
            quality_interval: 3,
            max_tracked_faces: 1,
            lost_timeout_frames: 5,
            min_face_fraction: 0.15,
            max_face_fraction: 0.7,
            center_tolerance: 0.15,
            max_yaw: 0.3,
            max_roll_degrees: 15.0,
            min_eye_aspect_ratio: 0.2,
            min_lighting: 0.3,
        }
    }
}

impl TrackerConfig {
    /// Longer stability window for high-assurance sessions.
    pub fn strict() -> Self {
        Self {
            stability_window: 10,
            quality_interval: 1,
            ..Self::default()
        }
    }
}

/// Frame dimensions plus the frame's mean luminance in [0,1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub brightness: f32,
}

/// Per-face quality snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceQuality {
    /// Face width / frame width.
    pub size_fraction: f32,
    pub centering: f32,
    /// Signed nose offset from the eye midpoint, in eye distances. `None` without landmarks.
    pub yaw: Option<f32>,
    /// Eye-line angle in degrees. `None` without landmarks.
    pub roll_degrees: Option<f32>,
    pub frontal: f32,
    pub lighting: f32,
    /// `None` when the detector gave no eye contours.
    pub eyes_open: Option<bool>,
    pub overall: f32,
}

impl FaceQuality {
    fn measure(face: &BoundingBox, geometry: FrameGeometry, config: &TrackerConfig) -> Self {
        let size_fraction = face.width / geometry.width.max(1) as f32;
        let (cx, cy) = face.normalized_center(geometry.width, geometry.height);
        let off_center = ((cx - 0.5).powi(2) + (cy - 0.5).powi(2)).sqrt();
        let centering = 1.0 - (off_center / 0.5).min(1.0);

        let (yaw, roll_degrees) = match &face.landmarks {
            Some(lm) => {
                let (le, re, nose) = (lm[0], lm[1], lm[2]);
                let dx = re.0 - le.0;
                let dy = re.1 - le.1;
                let eye_dist = (dx * dx + dy * dy).sqrt();
                let yaw = if eye_dist > f32::EPSILON {
                    (nose.0 - (le.0 + re.0) / 2.0) / eye_dist
                } else {
                    0.0
                };
                (Some(yaw), Some(dy.atan2(dx).to_degrees()))
            }
            None => (None, None),
        };
        let frontal = match yaw {
            Some(yaw) => 1.0 - (yaw.abs() / (2.0 * config.max_yaw)).min(1.0),
            None => 0.5,
        };

        let lighting = (1.0 - 2.0 * (geometry.brightness - 0.5).abs()).clamp(0.0, 1.0);

        let eyes_open = face.eyes.map(|eyes| {
            let (l, r) = eyes.aspect_ratios();
            l >= config.min_eye_aspect_ratio || r >= config.min_eye_aspect_ratio
        });
        let eyes_score = match eyes_open {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => 0.5,
        };

        let size_score = (size_fraction / 0.35).min(1.0);
        let overall =
            0.3 * size_score + 0.2 * centering + 0.2 * frontal + 0.2 * lighting + 0.1 * eyes_score;

        Self {
            size_fraction,
            centering,
            yaw,
            roll_degrees,
            frontal,
            lighting,
            eyes_open,
            overall,
        }
    }
}

/// A face followed across frames within one session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFace {
    pub id: Uuid,
    pub detection: BoundingBox,
    /// Recent normalised centres, oldest first, capped at the stability window.
    pub history: VecDeque<(f32, f32)>,
    pub is_stable: bool,
    pub quality: FaceQuality,
    pub first_seen: u64,
    pub last_seen: u64,
    updates_since_quality: u32,
}

impl TrackedFace {
    pub fn landmarks(&self) -> Option<&[(f32, f32); 5]> {
        self.detection.landmarks.as_ref()
    }

    fn center(&self) -> (f32, f32) {
        self.history.back().copied().unwrap_or((0.5, 0.5))
    }
}

/// One guidance message per update, highest-priority condition first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Guidance {
    NoFace,
    EyesClosed,
    PoorLighting,
    MoveCloser,
    MoveBack,
    FaceCamera,
    HoldStill,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
    Perfect,
}

impl Guidance {
    pub fn message(self) -> &'static str {
        match self {
            Guidance::NoFace => "Position your face in front of the camera",
            Guidance::EyesClosed => "Open your eyes",
            Guidance::PoorLighting => "Find better lighting",
            Guidance::MoveCloser => "Move closer",
            Guidance::MoveBack => "Move back",
            Guidance::FaceCamera => "Look straight at the camera",
            Guidance::HoldStill => "Hold still",
            Guidance::MoveLeft => "Move left",
            Guidance::MoveRight => "Move right",
            Guidance::MoveUp => "Move up",
            Guidance::MoveDown => "Move down",
            Guidance::Perfect => "Perfect",
        }
    }
}

/// Result of one tracking step.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackUpdate {
    pub new: Vec<TrackedFace>,
    pub updated: Vec<TrackedFace>,
    pub lost: Vec<Uuid>,
    pub guidance: Guidance,
}

#[derive(Debug)]
pub struct FaceTracker {
    config: TrackerConfig,
    faces: Vec<TrackedFace>,
    frame_index: u64,
}

impl FaceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            faces: Vec::new(),
            frame_index: 0,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn faces(&self) -> &[TrackedFace] {
        &self.faces
    }

    /// The tracked face with the highest overall quality.
    pub fn primary(&self) -> Option<&TrackedFace> {
        self.faces.iter().fold(None, |best: Option<&TrackedFace>, f| match best {
            Some(b) if b.quality.overall >= f.quality.overall => Some(b),
            _ => Some(f),
        })
    }

    /// Feed one frame's detections.
    pub fn track(&mut self, detections: &[BoundingBox], geometry: FrameGeometry) -> TrackUpdate {
        self.frame_index += 1;
        let now = self.frame_index;

        let mut order: Vec<usize> = (0..detections.len()).collect();
        order.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .partial_cmp(&detections[a].confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut matched = vec![false; self.faces.len()];
        let mut new_ids = Vec::new();
        let mut updated_ids = Vec::new();

        for idx in order {
            let det = &detections[idx];
            let center = det.normalized_center(geometry.width, geometry.height);

            let nearest = self
                .faces
                .iter()
                .enumerate()
                .filter(|(i, _)| !matched[*i])
                .map(|(i, f)| {
                    let (fx, fy) = f.center();
                    (i, ((center.0 - fx).powi(2) + (center.1 - fy).powi(2)).sqrt())
                })
                .filter(|(_, d)| *d < self.config.match_distance)
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            match nearest {
                Some((i, _)) => {
                    matched[i] = true;
                    self.update_face(i, det, center, geometry, now);
                    updated_ids.push(self.faces[i].id);
                }
                None => {
                    let face = self.create_face(det, center, geometry, now);
                    new_ids.push(face.id);
                    self.faces.push(face);
                    matched.push(true);
                }
            }
        }

        let mut lost = self.expire_unmatched(&matched, now);
        lost.extend(self.enforce_capacity());

        let snapshot = |ids: &[Uuid], faces: &[TrackedFace]| -> Vec<TrackedFace> {
            faces.iter().filter(|f| ids.contains(&f.id)).cloned().collect()
        };
        let new = snapshot(&new_ids, &self.faces);
        let updated = snapshot(&updated_ids, &self.faces);

        let guidance = match self.primary() {
            Some(face) => self.guidance_for(face),
            None => Guidance::NoFace,
        };

        if !lost.is_empty() {
            tracing::debug!(
                lost = lost.len(),
                remaining = self.faces.len(),
                "tracked faces dropped"
            );
        }

        TrackUpdate {
            new,
            updated,
            lost,
            guidance,
        }
    }

    /// Evaluate the guidance ladder for `face`. The first matching condition wins.
    pub fn guidance_for(&self, face: &TrackedFace) -> Guidance {
        let c = &self.config;
        let q = &face.quality;
        let (cx, cy) = face.center();

        if q.eyes_open == Some(false) {
            Guidance::EyesClosed
        } else if q.lighting < c.min_lighting {
            Guidance::PoorLighting
        } else if q.size_fraction < c.min_face_fraction {
            Guidance::MoveCloser
        } else if q.size_fraction > c.max_face_fraction {
            Guidance::MoveBack
        } else if q.yaw.is_some_and(|y| y.abs() > c.max_yaw)
            || q.roll_degrees.is_some_and(|r| r.abs() > c.max_roll_degrees)
        {
            Guidance::FaceCamera
        } else if !face.is_stable {
            Guidance::HoldStill
        } else if (cx - 0.5).abs() > c.center_tolerance {
            if cx < 0.5 {
                Guidance::MoveRight
            } else {
                Guidance::MoveLeft
            }
        } else if (cy - 0.5).abs() > c.center_tolerance {
            if cy < 0.5 {
                Guidance::MoveDown
            } else {
                Guidance::MoveUp
            }
        } else {
            Guidance::Perfect
        }
    }

    /// Drop all tracked faces (session teardown).
    pub fn reset(&mut self) {
        self.faces.clear();
        self.frame_index = 0;
    }

    fn create_face(
        &self,
        det: &BoundingBox,
        center: (f32, f32),
        geometry: FrameGeometry,
        now: u64,
    ) -> TrackedFace {
        let mut history = VecDeque::with_capacity(self.config.stability_window.max(1));
        history.push_back(center);
        let mut face = TrackedFace {
            id: Uuid::new_v4(),
            detection: det.clone(),
            history,
            is_stable: false,
            quality: FaceQuality::measure(det, geometry, &self.config),
            first_seen: now,
            last_seen: now,
            updates_since_quality: 0,
        };
        face.is_stable = self.is_still(&face.history);
        face
    }

    fn update_face(
        &mut self,
        i: usize,
        det: &BoundingBox,
        center: (f32, f32),
        geometry: FrameGeometry,
        now: u64,
    ) {
        let window = self.config.stability_window.max(1);
        let interval = self.config.quality_interval.max(1);

        let face = &mut self.faces[i];
        face.detection = det.clone();
        face.last_seen = now;
        if face.history.len() == window {
            face.history.pop_front();
        }
        face.history.push_back(center);

        face.updates_since_quality += 1;
        if face.updates_since_quality >= interval {
            face.quality = FaceQuality::measure(det, geometry, &self.config);
            face.updates_since_quality = 0;
        }

        let stable = self.is_still(&self.faces[i].history);
        self.faces[i].is_stable = stable;
    }

    fn is_still(&self, history: &VecDeque<(f32, f32)>) -> bool {
        let window = self.config.stability_window.max(1);
        if history.len() < window {
            return false;
        }
        let n = history.len() as f32;
        let (mx, my) = history
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        let (mx, my) = (mx / n, my / n);
        let variance = history
            .iter()
            .map(|(x, y)| (x - mx).powi(2) + (y - my).powi(2))
            .sum::<f32>()
            / n;
        variance < self.config.stability_variance
    }

    fn expire_unmatched(&mut self, matched: &[bool], now: u64) -> Vec<Uuid> {
        let immediate = self.config.max_tracked_faces <= 1;
        let timeout = self.config.lost_timeout_frames;
        let mut lost = Vec::new();
        let mut i = 0;
        self.faces.retain(|f| {
            let keep = matched.get(i).copied().unwrap_or(true)
                || (!immediate && now - f.last_seen <= timeout);
            i += 1;
            if !keep {
                lost.push(f.id);
            }
            keep
        });
        lost
    }

    fn enforce_capacity(&mut self) -> Vec<Uuid> {
        let capacity = self.config.max_tracked_faces.max(1);
        if self.faces.len() <= capacity {
            return Vec::new();
        }
        self.faces.sort_by(|a, b| {
            b.quality
                .overall
                .partial_cmp(&a.quality.overall)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.faces.split_off(capacity).into_iter().map(|f| f.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EyeContours;

    const GEOM: FrameGeometry = FrameGeometry { width: 640, height: 480, brightness: 0.5 };

    /// Frontal face of the given width centred at (cx, cy) in pixels.
    fn face_at(cx: f32, cy: f32, width: f32) -> BoundingBox {
        let mut b = BoundingBox::new(cx - width / 2.0, cy - width / 2.0, width, width, 0.9);
        let eye_dx = width * 0.2;
        b.landmarks = Some([
            (cx - eye_dx, cy - width * 0.1),
            (cx + eye_dx, cy - width * 0.1),
            (cx, cy + width * 0.05),
            (cx - eye_dx, cy + width * 0.25),
            (cx + eye_dx, cy + width * 0.25),
        ]);
        b
    }

    fn tracker() -> FaceTracker {
        FaceTracker::new(TrackerConfig::default())
    }

    #[test]
    fn test_first_detection_creates_face() {
        let mut t = tracker();
        let up = t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        assert_eq!(up.new.len(), 1);
        assert!(up.updated.is_empty());
        assert_eq!(up.guidance, Guidance::HoldStill);
    }

    #[test]
    fn test_nearby_detection_updates_same_face() {
        let mut t = tracker();
        let first = t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        let second = t.track(&[face_at(325.0, 242.0, 200.0)], GEOM);
        assert!(second.new.is_empty());
        assert_eq!(second.updated.len(), 1);
        assert_eq!(second.updated[0].id, first.new[0].id);
    }

    #[test]
    fn test_far_detection_replaces_single_face() {
        let mut t = tracker();
        let first = t.track(&[face_at(200.0, 240.0, 200.0)], GEOM);
        let second = t.track(&[face_at(440.0, 240.0, 200.0)], GEOM);
        assert_eq!(second.new.len(), 1);
        assert_eq!(second.lost, vec![first.new[0].id]);
        assert_eq!(t.faces().len(), 1);
    }

    #[test]
    fn test_stable_after_window() {
        let mut t = tracker();
        for i in 0..4 {
            let up = t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
            assert!(!t.faces()[0].is_stable, "stable too early at frame {i}");
            assert_eq!(up.guidance, Guidance::HoldStill);
        }
        let up = t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        assert!(t.faces()[0].is_stable);
        assert_eq!(up.guidance, Guidance::Perfect);
    }

    #[test]
    fn test_jitter_prevents_stability() {
        let mut t = tracker();
        for i in 0..8 {
            let dx = if i % 2 == 0 { -25.0 } else { 25.0 };
            t.track(&[face_at(320.0 + dx, 240.0, 200.0)], GEOM);
        }
        assert!(!t.faces()[0].is_stable);
    }

    #[test]
    fn test_strict_window_is_longer() {
        let mut t = FaceTracker::new(TrackerConfig::strict());
        for _ in 0..9 {
            t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        }
        assert!(!t.faces()[0].is_stable);
        t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        assert!(t.faces()[0].is_stable);
    }

    #[test]
    fn test_no_detection_loses_face_and_reports_no_face() {
        let mut t = tracker();
        let first = t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        let up = t.track(&[], GEOM);
        assert_eq!(up.lost, vec![first.new[0].id]);
        assert_eq!(up.guidance, Guidance::NoFace);
    }

    #[test]
    fn test_multi_face_retention_until_timeout() {
        let mut t = FaceTracker::new(TrackerConfig {
            max_tracked_faces: 2,
            lost_timeout_frames: 2,
            ..TrackerConfig::default()
        });
        t.track(&[face_at(320.0, 240.0, 200.0)], GEOM);
        assert!(t.track(&[], GEOM).lost.is_empty());
        assert!(t.track(&[], GEOM).lost.is_empty());
        assert_eq!(t.track(&[], GEOM).lost.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_lowest_quality() {
        let mut t = tracker();
        let small = face_at(100.0, 100.0, 60.0);
        let large = face_at(320.0, 240.0, 220.0);
        let up = t.track(&[small, large.clone()], GEOM);
        assert_eq!(t.faces().len(), 1);
        assert_eq!(t.faces()[0].detection, large);
        assert_eq!(up.lost.len(), 1);
    }

    #[test]
    fn test_guidance_size_ladder() {
        let mut t = tracker();
        assert_eq!(t.track(&[face_at(320.0, 240.0, 40.0)], GEOM).guidance, Guidance::MoveCloser);
        t.reset();
        assert_eq!(t.track(&[face_at(320.0, 240.0, 500.0)], GEOM).guidance, Guidance::MoveBack);
    }

    #[test]
    fn test_guidance_lighting_outranks_size() {
        let mut t = tracker();
        let dark = FrameGeometry { brightness: 0.05, ..GEOM };
        assert_eq!(t.track(&[face_at(320.0, 240.0, 40.0)], dark).guidance, Guidance::PoorLighting);
    }

    #[test]
    fn test_guidance_eyes_closed_outranks_everything() {
        let mut t = tracker();
        let mut face = face_at(320.0, 240.0, 40.0);
        let closed = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0), (2.0, 0.0), (1.0, 0.0)];
        face.eyes = Some(EyeContours { left: closed, right: closed });
        let dark = FrameGeometry { brightness: 0.05, ..GEOM };
        assert_eq!(t.track(&[face], dark).guidance, Guidance::EyesClosed);
    }

    #[test]
    fn test_guidance_off_angle() {
        let mut t = tracker();
        let mut face = face_at(320.0, 240.0, 200.0);
        if let Some(lm) = face.landmarks.as_mut() {
            lm[2].0 += 60.0; // nose far right of eye midpoint
        }
        assert_eq!(t.track(&[face], GEOM).guidance, Guidance::FaceCamera);
    }

    #[test]
    fn test_guidance_off_center_after_stable() {
        let mut t = tracker();
        let last = (0..5).map(|_| t.track(&[face_at(100.0, 240.0, 150.0)], GEOM).guidance).last();
        assert_eq!(last, Some(Guidance::MoveRight));

        t.reset();
        let last = (0..5).map(|_| t.track(&[face_at(320.0, 420.0, 150.0)], GEOM).guidance).last();
        assert_eq!(last, Some(Guidance::MoveUp));
    }
}
