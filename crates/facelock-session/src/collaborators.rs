//! Contracts for the platform services the orchestrator consumes.
//!
//! Capture, detection, descriptor extraction, storage and encryption are all
//! swappable. The orchestrator depends only on these traits.

use crate::crypto::{CipherError, EncryptedDescriptor};
use async_trait::async_trait;
use facelock_core::{BoundingBox, Descriptor};
use facelock_hw::Frame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone)]
pub enum DetectorError {
    /// The frame itself is unusable. Reported to the session once.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("detection failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone)]
pub enum ExtractionError {
    #[error("face region quality too low: {0}")]
    LowQuality(String),
    #[error("no face in region")]
    NoFace,
    #[error("extraction failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    Failed(String),
}

/// Face regions (with optional landmarks) for a frame. Pure function of its input.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// One-time setup, run during `configure`.
    async fn prepare(&self) -> Result<(), DetectorError> {
        Ok(())
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Descriptor plus the extractor's own confidence in it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub descriptor: Descriptor,
    pub confidence: f32,
}

#[async_trait]
pub trait EmbeddingExtractor: Send + Sync {
    async fn prepare(&self) -> Result<(), ExtractionError> {
        Ok(())
    }

    async fn extract(
        &self,
        frame: &Frame,
        face: &BoundingBox,
    ) -> Result<Extraction, ExtractionError>;
}

/// Symmetric encryption of stored descriptors. `decrypt(encrypt(d)) == d`.
pub trait DescriptorCipher: Send + Sync {
    fn encrypt(&self, descriptor: &Descriptor) -> Result<EncryptedDescriptor, CipherError>;
    fn decrypt(&self, encrypted: &EncryptedDescriptor) -> Result<Descriptor, CipherError>;
}

/// Produces ordered frames into a [`FrameSink`] between `start` and `stop`.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn open(&self) -> Result<(), CaptureError>;
    async fn start(&self, sink: FrameSink) -> Result<(), CaptureError>;
    async fn stop(&self) -> Result<(), CaptureError>;
}

/// Non-blocking entry point for frames into a session.
///
/// Never waits: a frame that cannot be queued immediately is counted and
/// discarded.
#[derive(Clone, Debug)]
pub struct FrameSink {
    tx: mpsc::Sender<Frame>,
    overflow: Arc<AtomicU64>,
}

impl FrameSink {
    pub(crate) fn new(tx: mpsc::Sender<Frame>, overflow: Arc<AtomicU64>) -> Self {
        Self { tx, overflow }
    }

    /// Offer a frame. Returns `false` if it was discarded.
    pub fn submit(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                self.overflow.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(sequence = frame.sequence, "frame queue full; dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_counts_overflow() {
        let (tx, mut rx) = mpsc::channel(1);
        let overflow = Arc::new(AtomicU64::new(0));
        let sink = FrameSink::new(tx, Arc::clone(&overflow));
        assert!(sink.submit(Frame::new(vec![0; 4], 2, 2, 1)));
        assert!(!sink.submit(Frame::new(vec![0; 4], 2, 2, 2)));
        assert_eq!(overflow.load(Ordering::Relaxed), 1);
        assert_eq!(rx.recv().await.map(|f| f.sequence), Some(1));
    }

    #[tokio::test]
    async fn test_sink_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = FrameSink::new(tx, Arc::new(AtomicU64::new(0)));
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.submit(Frame::new(vec![0; 4], 2, 2, 1)));
    }
}
