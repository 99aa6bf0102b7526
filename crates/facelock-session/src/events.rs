//! Typed notifications published by a running orchestrator.

use crate::enrollment::EnrollmentProgress;
use crate::state::SessionState;
use facelock_core::Guidance;
use serde::{Deserialize, Serialize};

/// Why a frame produced no result. Recoverable: the session keeps scanning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameRejection {
    LowQuality { overall: f32 },
    NoFace,
    NotStable,
    LowLiveness { confidence: f32 },
    ExtractionFailed,
    NoMatch,
    Ambiguous { best: f32, runner_up: f32 },
    OperationTimedOut,
    CollaboratorError,
    MalformedFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// A previous frame is still being processed.
    Busy,
    /// No session is scanning.
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    /// Emitted only when the message changes.
    Guidance(Guidance),
    FrameRejected { sequence: u64, reason: FrameRejection },
    EnrollmentProgress(EnrollmentProgress),
    /// Auto mode found no confident match and is enrolling a new identity.
    ModeSwitched { name: String },
    FrameDropped { sequence: u64, reason: DropReason },
    /// A frame finished the pipeline and its result was applied.
    FrameHandled { sequence: u64 },
}

/// Frame accounting since the orchestrator was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub received: u64,
    pub processed: u64,
    /// Dropped because processing was in flight or the queue was full.
    pub dropped_busy: u64,
    /// Arrived while no session was active.
    pub ignored: u64,
    /// In-flight results discarded after cancel, stop or timeout.
    pub discarded: u64,
}
