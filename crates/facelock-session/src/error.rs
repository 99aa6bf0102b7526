use crate::collaborators::{CaptureError, DetectorError, ExtractionError};
use crate::crypto::CipherError;
use crate::store::StoreError;
use thiserror::Error;

/// Error taxonomy used to decide between retrying and failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Missing or unusable collaborator, invalid parameters, unmet precondition.
    Configuration,
    /// The session keeps scanning.
    Recoverable,
    /// The session moves to a terminal state.
    SessionFatal,
    /// Never coerced to a default value.
    Data,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("orchestrator is not configured")]
    NotConfigured,
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no identities enrolled")]
    NoIdentitiesEnrolled,
    #[error("missing collaborator: {0}")]
    MissingComponent(&'static str),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("extractor error: {0}")]
    Extractor(#[from] ExtractionError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("orchestrator task exited")]
    ChannelClosed,
}

impl SessionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SessionError::NotConfigured
            | SessionError::NoIdentitiesEnrolled
            | SessionError::MissingComponent(_)
            | SessionError::Capture(_) => ErrorClass::Configuration,
            SessionError::AlreadyActive
            | SessionError::Detector(_)
            | SessionError::Extractor(_)
            | SessionError::Timeout { .. } => ErrorClass::Recoverable,
            SessionError::Store(_) | SessionError::ChannelClosed => ErrorClass::SessionFatal,
            SessionError::Cipher(_) => ErrorClass::Data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(SessionError::NoIdentitiesEnrolled.class(), ErrorClass::Configuration);
        assert_eq!(SessionError::MissingComponent("detector").class(), ErrorClass::Configuration);
        assert_eq!(
            SessionError::Extractor(ExtractionError::NoFace).class(),
            ErrorClass::Recoverable
        );
        assert_eq!(SessionError::Cipher(CipherError::Decrypt).class(), ErrorClass::Data);
    }
}
