//! facelock-session: biometric session orchestration.
//!
//! Drives a stream of camera frames through quality gating, tracking,
//! liveness and 1:N matching, accumulates enrollment samples, and persists
//! encrypted identities. Platform services (capture, detection, descriptor
//! extraction, storage, encryption) are consumed through the traits in
//! [`collaborators`].

pub mod capture;
pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod enrollment;
pub mod error;
pub mod events;
pub mod orchestrator;
mod pipeline;
pub mod state;
pub mod store;

pub use capture::ReplaySource;
pub use collaborators::{
    CaptureError, CaptureSource, DescriptorCipher, DetectorError, EmbeddingExtractor, Extraction,
    ExtractionError, FaceDetector, FrameSink,
};
pub use config::{Profile, SessionConfig};
pub use crypto::{AesGcmCipher, CipherError, EncryptedDescriptor};
pub use enrollment::{EnrollmentProgress, RegistrationAccumulator};
pub use error::{ErrorClass, SessionError};
pub use events::{DropReason, FrameRejection, SessionEvent, SessionStats};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SessionHandle};
pub use state::{FailureReason, SessionMode, SessionState};
pub use store::{
    IdentityMetadata, IdentityRecord, IdentityStore, MemoryIdentityStore, SqliteIdentityStore,
    StoreError,
};
