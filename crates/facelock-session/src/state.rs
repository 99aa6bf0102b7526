use serde::{Deserialize, Serialize};

/// Why a session ended in [`SessionState::Failed`].
///
/// Fieldless so that two failures compare equal iff they are the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    Timeout,
    NoIdentitiesEnrolled,
    CaptureUnavailable,
    ConfigurationError,
    /// Too many consecutive detector/extractor failures or timeouts.
    CollaboratorFailure,
    StorageFailure,
    EncryptionFailure,
    DecryptionFailure,
    DimensionMismatch,
    /// Per-frame processing task ended abnormally.
    Internal,
}

impl FailureReason {
    /// Whether the caller should fix configuration rather than simply retry.
    pub fn needs_configuration(self) -> bool {
        matches!(
            self,
            FailureReason::NoIdentitiesEnrolled
                | FailureReason::CaptureUnavailable
                | FailureReason::ConfigurationError
                | FailureReason::DimensionMismatch
                | FailureReason::DecryptionFailure
        )
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::Timeout => "session timed out",
            FailureReason::NoIdentitiesEnrolled => "no identities enrolled",
            FailureReason::CaptureUnavailable => "capture source unavailable",
            FailureReason::ConfigurationError => "configuration error",
            FailureReason::CollaboratorFailure => "repeated collaborator failure",
            FailureReason::StorageFailure => "identity storage failure",
            FailureReason::EncryptionFailure => "descriptor encryption failure",
            FailureReason::DecryptionFailure => "descriptor decryption failure",
            FailureReason::DimensionMismatch => "descriptor dimension mismatch",
            FailureReason::Internal => "internal processing failure",
        };
        f.write_str(s)
    }
}

/// What a session is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    /// 1:N identification against the enrolled gallery.
    Authenticate,
    /// Collect samples for a new identity with this display name.
    Enroll { name: String },
    /// Authenticate, falling back to enrolling a freshly named identity.
    Auto,
}

/// The orchestrator's single source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    NotConfigured,
    Configuring,
    Ready,
    Scanning,
    Processing,
    /// Enrollment in progress (the scanning/processing variant for enroll and auto modes).
    UserRegistration { name: String, collected: usize, required: usize },
    Completed { identity: String, display_name: String, enrolled: bool },
    Failed { reason: FailureReason },
    Cancelled,
}

impl SessionState {
    /// Frames are admitted only in these states.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Scanning
                | SessionState::Processing
                | SessionState::UserRegistration { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed { .. } | SessionState::Failed { .. } | SessionState::Cancelled
        )
    }

    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::NotConfigured => "not_configured",
            SessionState::Configuring => "configuring",
            SessionState::Ready => "ready",
            SessionState::Scanning => "scanning",
            SessionState::Processing => "processing",
            SessionState::UserRegistration { .. } => "user_registration",
            SessionState::Completed { .. } => "completed",
            SessionState::Failed { .. } => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_compare_by_kind() {
        let a = SessionState::Failed { reason: FailureReason::Timeout };
        let b = SessionState::Failed { reason: FailureReason::Timeout };
        let c = SessionState::Failed { reason: FailureReason::StorageFailure };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_activity_classification() {
        assert!(SessionState::Scanning.is_active());
        let registering = SessionState::UserRegistration {
            name: "a".into(),
            collected: 0,
            required: 5,
        };
        assert!(registering.is_active());
        assert!(!SessionState::Ready.is_active());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Processing.is_terminal());
    }

    #[test]
    fn test_configuration_failures_are_flagged() {
        assert!(FailureReason::NoIdentitiesEnrolled.needs_configuration());
        assert!(!FailureReason::Timeout.needs_configuration());
    }
}
