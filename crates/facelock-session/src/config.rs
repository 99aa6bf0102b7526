use facelock_core::{LivenessConfig, MatcherConfig, QualityConfig, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named performance profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Profile {
    /// Low latency: subsampled analysis, small buffer, liveness advisory only.
    Speed,
    #[default]
    Quality,
    /// Like speed, with fewer enhancement passes.
    Battery,
    /// High assurance: long stability window, mandatory liveness, tighter thresholds.
    Strict,
}

impl Profile {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "speed" => Some(Profile::Speed),
            "quality" => Some(Profile::Quality),
            "battery" => Some(Profile::Battery),
            "strict" => Some(Profile::Strict),
            _ => None,
        }
    }
}

/// Everything a session needs, as plain option structs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub profile: Profile,
    pub quality: QualityConfig,
    pub tracker: TrackerConfig,
    pub liveness: LivenessConfig,
    pub matcher: MatcherConfig,
    /// Session deadline when `start` is not given one.
    pub session_timeout: Duration,
    /// Bound on every detector, extractor and store call.
    pub operation_timeout: Duration,
    /// Descriptors collected before an enrollment is persisted.
    pub required_samples: usize,
    /// Recent-frame ring size.
    pub frame_buffer_size: usize,
    /// Frames waiting for the session task before new ones are discarded.
    pub frame_queue_depth: usize,
    /// Reject frames that fail the liveness threshold.
    pub liveness_required: bool,
    /// Reject frames until the tracked face is stable.
    pub require_stable_face: bool,
    pub enhance_frames: bool,
    /// Consecutive collaborator failures before the session fails.
    pub max_consecutive_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_profile(Profile::Quality)
    }
}

impl SessionConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let base = Self {
            profile,
            quality: QualityConfig::default(),
            tracker: TrackerConfig::default(),
            liveness: LivenessConfig::default(),
            matcher: MatcherConfig::default(),
            session_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(2),
            required_samples: 5,
            frame_buffer_size: 5,
            frame_queue_depth: 4,
            liveness_required: true,
            require_stable_face: true,
            enhance_frames: true,
            max_consecutive_failures: 5,
        };

        match profile {
            Profile::Quality => base,
            Profile::Speed => Self {
                quality: QualityConfig {
                    analysis_stride: 2,
                    ..base.quality
                },
                frame_buffer_size: 3,
                liveness_required: false,
                operation_timeout: Duration::from_secs(1),
                ..base
            },
            Profile::Battery => Self {
                quality: QualityConfig {
                    analysis_stride: 2,
                    ..base.quality
                },
                frame_buffer_size: 3,
                liveness_required: false,
                enhance_frames: false,
                ..base
            },
            Profile::Strict => Self {
                tracker: TrackerConfig::strict(),
                liveness: LivenessConfig {
                    threshold: 0.85,
                    ..base.liveness
                },
                matcher: MatcherConfig {
                    base_threshold: 0.7,
                    min_gap: 0.08,
                    ..base.matcher
                },
                frame_buffer_size: 10,
                required_samples: 7,
                ..base
            },
        }
    }

    /// Profile from `FACELOCK_PROFILE` plus `FACELOCK_*` numeric overrides.
    ///
    /// Unset or unparseable values fall back to the profile default.
    pub fn from_env() -> Self {
        let profile = std::env::var("FACELOCK_PROFILE")
            .ok()
            .and_then(|v| Profile::parse(&v))
            .unwrap_or_default();
        let mut config = Self::for_profile(profile);

        config.session_timeout = Duration::from_secs(env_u64(
            "FACELOCK_SESSION_TIMEOUT_SECS",
            config.session_timeout.as_secs(),
        ));
        config.matcher.base_threshold =
            env_f32("FACELOCK_SIMILARITY_THRESHOLD", config.matcher.base_threshold);
        config.required_samples = env_usize("FACELOCK_REQUIRED_SAMPLES", config.required_samples);
        config
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
