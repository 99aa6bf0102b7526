//! facelock-core: per-frame face analysis and identity matching.
//!
//! Frame quality gating, face tracking with user guidance, liveness signal
//! fusion and 1:N descriptor matching. Everything here is synchronous and
//! owns its state exclusively; the session crate drives it.

pub mod liveness;
pub mod matcher;
pub mod quality;
pub mod tracker;
pub mod types;

pub use liveness::{LivenessConfig, LivenessFusion, LivenessMethod, LivenessResult, LivenessSignals};
pub use matcher::{
    ComparisonResult, DistanceMetric, IdentificationResult, IdentityMatcher, IdentityStatistics,
    MatchError, MatchRejection, MatcherConfig,
};
pub use quality::{FrameQuality, QualityConfig, QualityError, QualityGate};
pub use tracker::{
    FaceQuality, FaceTracker, FrameGeometry, Guidance, TrackUpdate, TrackedFace, TrackerConfig,
};
pub use types::{BoundingBox, Descriptor, EyeContour, EyeContours};
