//! Per-frame processing, from detection through the mode decision.
//!
//! A [`Pipeline`] owns every stateful analysis component of a session. The
//! orchestrator moves it into a spawned task for each admitted frame and gets
//! it back, together with a [`FrameReport`], when the frame is done. Only the
//! orchestrator applies reports to session state.

use crate::collaborators::{
    DescriptorCipher, DetectorError, EmbeddingExtractor, ExtractionError, FaceDetector,
};
use crate::config::SessionConfig;
use crate::enrollment::{EnrollmentProgress, RegistrationAccumulator};
use crate::events::FrameRejection;
use crate::state::{FailureReason, SessionMode};
use crate::store::{IdentityMetadata, IdentityRecord, IdentityStore};
use chrono::Utc;
use facelock_core::{
    Descriptor, FaceTracker, FrameGeometry, Guidance, IdentityMatcher, LivenessFusion,
    LivenessSignals, MatchError, MatchRejection, QualityGate,
};
use facelock_hw::Frame;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

#[derive(Clone)]
pub(crate) struct Collaborators {
    pub detector: Arc<dyn FaceDetector>,
    pub extractor: Arc<dyn EmbeddingExtractor>,
    pub store: Arc<dyn IdentityStore>,
    pub cipher: Arc<dyn DescriptorCipher>,
}

/// Enrolled identities, decrypted once per session.
#[derive(Debug, Default, Clone)]
pub(crate) struct Gallery {
    pub descriptors: BTreeMap<String, Vec<Descriptor>>,
    pub names: HashMap<String, String>,
}

impl Gallery {
    pub fn insert(&mut self, id: String, display_name: String, descriptors: Vec<Descriptor>) {
        self.names.insert(id.clone(), display_name);
        self.descriptors.insert(id, descriptors);
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Descriptor length of the enrolled population, if any is enrolled.
    pub fn dimension(&self) -> Option<usize> {
        self.descriptors.values().flatten().next().map(Descriptor::len)
    }
}

enum ActiveMode {
    Authenticate,
    Auto,
    Enroll(RegistrationAccumulator),
}

struct ActiveSession {
    mode: ActiveMode,
    gallery: Gallery,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FrameOutcome {
    Rejected(FrameRejection),
    Progress(EnrollmentProgress),
    Authenticated {
        identity: String,
        display_name: String,
        similarity: f32,
    },
    Enrolled {
        metadata: IdentityMetadata,
        progress: EnrollmentProgress,
    },
    Failed(FailureReason),
    /// The pipeline had no active session.
    Idle,
}

#[derive(Debug, Clone)]
pub(crate) struct FrameReport {
    pub sequence: u64,
    pub guidance: Option<Guidance>,
    /// Overall frame quality, set whenever a face was tracked.
    pub face_quality: Option<f32>,
    /// Name of the identity auto mode started enrolling on this frame.
    pub mode_switch: Option<String>,
    /// A detector/extractor failure or timeout occurred.
    pub collaborator_failure: bool,
    pub outcome: FrameOutcome,
}

impl FrameReport {
    fn new(sequence: u64) -> Self {
        Self {
            sequence,
            guidance: None,
            face_quality: None,
            mode_switch: None,
            collaborator_failure: false,
            outcome: FrameOutcome::Idle,
        }
    }
}

pub(crate) struct Pipeline {
    gate: QualityGate,
    tracker: FaceTracker,
    liveness: LivenessFusion,
    matcher: IdentityMatcher,
    collaborators: Collaborators,
    operation_timeout: Duration,
    required_samples: usize,
    liveness_required: bool,
    require_stable_face: bool,
    enhance_frames: bool,
    active: Option<ActiveSession>,
    malformed_reported: bool,
}

impl Pipeline {
    pub fn new(config: &SessionConfig, collaborators: Collaborators) -> Self {
        Self {
            gate: QualityGate::new(config.quality.clone()),
            tracker: FaceTracker::new(config.tracker.clone()),
            liveness: LivenessFusion::new(config.liveness.clone()),
            matcher: IdentityMatcher::new(config.matcher.clone()),
            collaborators,
            operation_timeout: config.operation_timeout,
            required_samples: config.required_samples,
            liveness_required: config.liveness_required,
            require_stable_face: config.require_stable_face,
            enhance_frames: config.enhance_frames,
            active: None,
            malformed_reported: false,
        }
    }

    /// Start a fresh session. Any previous per-session state is dropped first.
    pub fn begin(&mut self, mode: &SessionMode, gallery: Gallery) {
        self.end();
        let mode = match mode {
            SessionMode::Authenticate => ActiveMode::Authenticate,
            SessionMode::Auto => ActiveMode::Auto,
            SessionMode::Enroll { name } => ActiveMode::Enroll(
                RegistrationAccumulator::new(name.clone(), self.required_samples)
                    .with_dimension(gallery.dimension()),
            ),
        };
        self.active = Some(ActiveSession { mode, gallery });
    }

    /// Drop tracked faces, liveness history, gate history and any accumulator.
    pub fn end(&mut self) {
        self.gate.reset();
        self.tracker.reset();
        self.liveness.reset();
        self.active = None;
        self.malformed_reported = false;
    }

    pub fn matcher(&self) -> &IdentityMatcher {
        &self.matcher
    }

    pub fn matcher_mut(&mut self) -> &mut IdentityMatcher {
        &mut self.matcher
    }

    pub async fn process(&mut self, frame: &Frame) -> FrameReport {
        let mut report = FrameReport::new(frame.sequence);
        let outcome = self.run(frame, &mut report).await;
        report.outcome = outcome;
        tracing::debug!(sequence = frame.sequence, outcome = ?report.outcome, "frame processed");
        report
    }

    async fn run(&mut self, frame: &Frame, report: &mut FrameReport) -> FrameOutcome {
        if self.active.is_none() {
            return FrameOutcome::Idle;
        }
        let sequence = frame.sequence;

        let detect = self.collaborators.detector.detect(frame);
        let detections = match timeout(self.operation_timeout, detect).await {
            Err(_) => {
                tracing::warn!(sequence, "face detector timed out");
                report.collaborator_failure = true;
                return FrameOutcome::Rejected(FrameRejection::OperationTimedOut);
            }
            Ok(Err(DetectorError::MalformedInput(reason))) => {
                if !self.malformed_reported {
                    self.malformed_reported = true;
                    tracing::warn!(sequence, %reason, "detector rejected malformed frame");
                    return FrameOutcome::Rejected(FrameRejection::MalformedFrame);
                }
                tracing::debug!(sequence, %reason, "malformed frame treated as no detection");
                Vec::new()
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    sequence,
                    error = %err,
                    "face detection failed; treating as no detection"
                );
                report.collaborator_failure = true;
                Vec::new()
            }
            Ok(Ok(detections)) => detections,
        };

        let strongest = detections.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let quality = self.gate.evaluate(frame, strongest);
        let update = self.tracker.track(
            &detections,
            FrameGeometry {
                width: frame.width,
                height: frame.height,
                brightness: quality.brightness,
            },
        );
        report.guidance = Some(update.guidance);

        let Some(face) = self.tracker.primary().cloned() else {
            return FrameOutcome::Rejected(FrameRejection::NoFace);
        };
        report.face_quality = Some(quality.overall);

        if !quality.is_acceptable {
            tracing::debug!(sequence, overall = quality.overall, "frame below quality floor");
            return FrameOutcome::Rejected(FrameRejection::LowQuality {
                overall: quality.overall,
            });
        }
        if self.require_stable_face && !face.is_stable {
            return FrameOutcome::Rejected(FrameRejection::NotStable);
        }

        let enhanced = if self.enhance_frames {
            let enhancement = self.gate.enhancement_for(&quality);
            if enhancement.is_empty() {
                None
            } else {
                match facelock_hw::enhance(frame, &enhancement) {
                    Ok(f) => Some(f),
                    Err(err) => {
                        tracing::debug!(
                            sequence,
                            error = %err,
                            "enhancement failed; using original frame"
                        );
                        None
                    }
                }
            }
        } else {
            None
        };
        let working = enhanced.as_ref().unwrap_or(frame);

        let extraction = match timeout(
            self.operation_timeout,
            self.collaborators.extractor.extract(working, &face.detection),
        )
        .await
        {
            Err(_) => {
                tracing::warn!(sequence, "embedding extractor timed out");
                report.collaborator_failure = true;
                return FrameOutcome::Rejected(FrameRejection::OperationTimedOut);
            }
            Ok(Err(ExtractionError::LowQuality(reason))) => {
                tracing::debug!(sequence, %reason, "extractor rejected face quality");
                return FrameOutcome::Rejected(FrameRejection::LowQuality {
                    overall: quality.overall,
                });
            }
            Ok(Err(ExtractionError::NoFace)) => {
                return FrameOutcome::Rejected(FrameRejection::NoFace);
            }
            Ok(Err(ExtractionError::Failed(reason))) => {
                tracing::warn!(sequence, %reason, "descriptor extraction failed");
                report.collaborator_failure = true;
                return FrameOutcome::Rejected(FrameRejection::ExtractionFailed);
            }
            Ok(Ok(extraction)) => extraction,
        };
        if extraction.descriptor.is_empty() {
            tracing::warn!(sequence, "extractor returned an empty descriptor");
            report.collaborator_failure = true;
            return FrameOutcome::Rejected(FrameRejection::ExtractionFailed);
        }
        if !extraction.descriptor.is_finite() {
            tracing::warn!(sequence, "extractor returned non-finite descriptor values");
            report.collaborator_failure = true;
            return FrameOutcome::Rejected(FrameRejection::ExtractionFailed);
        }

        let region = face.detection.region(frame.width, frame.height);
        let liveness = self.liveness.assess(LivenessSignals {
            luma: region.and_then(|r| frame.crop(r).ok()),
            depth: region.and_then(|r| frame.crop_depth(r)),
            face_quality: Some(face.quality.overall),
            face: face.detection,
        });
        if self.liveness_required && !liveness.is_live {
            return FrameOutcome::Rejected(FrameRejection::LowLiveness {
                confidence: liveness.confidence,
            });
        }

        self.decide(extraction.descriptor, report).await
    }

    async fn decide(&mut self, descriptor: Descriptor, report: &mut FrameReport) -> FrameOutcome {
        let Some(active) = self.active.as_mut() else {
            return FrameOutcome::Idle;
        };

        match active.mode {
            ActiveMode::Enroll(ref mut acc) => {
                let progress = match acc.push(descriptor) {
                    Ok(progress) => progress,
                    Err(err) => return refused_sample(err, report),
                };
                if !acc.is_complete() {
                    return FrameOutcome::Progress(progress);
                }
            }
            ActiveMode::Authenticate | ActiveMode::Auto => {
                let gallery = &active.gallery.descriptors;
                let identification = match self.matcher.identify(&descriptor, gallery) {
                    Ok(result) => result,
                    Err(err @ MatchError::DimensionMismatch { .. }) => {
                        tracing::error!(
                            error = %err,
                            "descriptor incompatible with enrolled gallery"
                        );
                        return FrameOutcome::Failed(FailureReason::DimensionMismatch);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "identification failed");
                        report.collaborator_failure = true;
                        return FrameOutcome::Rejected(FrameRejection::CollaboratorError);
                    }
                };

                if let Some(identity) = identification.identity {
                    let similarity = identification
                        .best
                        .map(|(_, r)| r.similarity)
                        .unwrap_or_default();
                    let display_name = active
                        .gallery
                        .names
                        .get(&identity)
                        .cloned()
                        .unwrap_or_else(|| identity.clone());
                    tracing::info!(identity = %identity, similarity, "identity matched");
                    return FrameOutcome::Authenticated {
                        identity,
                        display_name,
                        similarity,
                    };
                }

                let switch_to_enroll = matches!(active.mode, ActiveMode::Auto)
                    && matches!(
                        identification.rejection,
                        Some(
                            MatchRejection::NoIdentities
                                | MatchRejection::BelowThreshold { .. }
                                | MatchRejection::LowConfidence { .. }
                        )
                    );
                if !switch_to_enroll {
                    return FrameOutcome::Rejected(match identification.rejection {
                        Some(MatchRejection::Ambiguous { best, runner_up }) => {
                            FrameRejection::Ambiguous { best, runner_up }
                        }
                        _ => FrameRejection::NoMatch,
                    });
                }

                let name = format!("user-{}", &Uuid::new_v4().simple().to_string()[..8]);
                tracing::info!(
                    %name,
                    rejection = ?identification.rejection,
                    "no confident match; enrolling new identity"
                );
                report.mode_switch = Some(name.clone());
                let mut acc = RegistrationAccumulator::new(name, self.required_samples)
                    .with_dimension(active.gallery.dimension());
                let progress = match acc.push(descriptor) {
                    Ok(progress) => progress,
                    Err(err) => return refused_sample(err, report),
                };
                let complete = acc.is_complete();
                active.mode = ActiveMode::Enroll(acc);
                if !complete {
                    return FrameOutcome::Progress(progress);
                }
            }
        }

        self.persist().await
    }

    /// Seal and store a completed enrollment, then recalibrate its threshold.
    async fn persist(&mut self) -> FrameOutcome {
        let Some(active) = self.active.as_mut() else {
            return FrameOutcome::Idle;
        };
        let ActiveMode::Enroll(acc) = std::mem::replace(&mut active.mode, ActiveMode::Authenticate)
        else {
            return FrameOutcome::Idle;
        };
        let progress = acc.progress();
        let (display_name, descriptors) = acc.into_parts();
        let id = Uuid::new_v4().to_string();

        // Recalibrating first also verifies the samples agree with each other.
        match self.matcher.recalibrate(&id, &descriptors) {
            Ok(_) | Err(MatchError::InsufficientSamples(_)) => {}
            Err(err) => {
                tracing::error!(
                    identity = %id,
                    error = %err,
                    "enrollment samples are inconsistent"
                );
                self.matcher.forget(&id);
                return FrameOutcome::Failed(match err {
                    MatchError::DimensionMismatch { .. } => FailureReason::DimensionMismatch,
                    _ => FailureReason::Internal,
                });
            }
        }

        let sealed = match descriptors
            .iter()
            .map(|d| self.collaborators.cipher.encrypt(d))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(sealed) => sealed,
            Err(err) => {
                tracing::error!(error = %err, "failed to encrypt enrollment descriptors");
                self.matcher.forget(&id);
                return FrameOutcome::Failed(FailureReason::EncryptionFailure);
            }
        };

        let now = Utc::now();
        let metadata = IdentityMetadata {
            id,
            display_name,
            created_at: now,
            updated_at: now,
            sample_count: sealed.len(),
        };
        let record = IdentityRecord {
            metadata: metadata.clone(),
            descriptors: sealed,
        };
        match timeout(self.operation_timeout, self.collaborators.store.add(record)).await {
            Err(_) => {
                tracing::error!(identity = %metadata.id, "identity store write timed out");
                self.matcher.forget(&metadata.id);
                return FrameOutcome::Failed(FailureReason::StorageFailure);
            }
            Ok(Err(err)) => {
                tracing::error!(
                    identity = %metadata.id,
                    error = %err,
                    "identity store write failed"
                );
                self.matcher.forget(&metadata.id);
                return FrameOutcome::Failed(FailureReason::StorageFailure);
            }
            Ok(Ok(())) => {}
        }

        tracing::info!(
            identity = %metadata.id,
            name = %metadata.display_name,
            samples = metadata.sample_count,
            "identity enrolled"
        );
        FrameOutcome::Enrolled { metadata, progress }
    }
}

/// Outcome for a sample the registration accumulator refused.
fn refused_sample(err: MatchError, report: &mut FrameReport) -> FrameOutcome {
    match err {
        MatchError::DimensionMismatch { .. } => {
            tracing::error!(error = %err, "enrollment sample length differs from earlier samples");
            FrameOutcome::Failed(FailureReason::DimensionMismatch)
        }
        _ => {
            tracing::warn!(error = %err, "enrollment sample refused");
            report.collaborator_failure = true;
            FrameOutcome::Rejected(FrameRejection::ExtractionFailed)
        }
    }
}
