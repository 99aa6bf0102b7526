#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use facelock_core::{BoundingBox, Descriptor};
use facelock_hw::Frame;
use facelock_session::{
    AesGcmCipher, DescriptorCipher, DetectorError, EmbeddingExtractor, Extraction, ExtractionError,
    FaceDetector, IdentityMetadata, IdentityRecord, IdentityStore, MemoryIdentityStore,
    Orchestrator, SessionConfig, SessionEvent, SessionHandle,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 64;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 2px checkerboard of 80/200: bright enough, sharp, high contrast.
pub fn textured_frame(sequence: u64) -> Frame {
    let data = (0..HEIGHT)
        .flat_map(|y| (0..WIDTH).map(move |x| if (x / 2 + y / 2) % 2 == 0 { 80 } else { 200 }))
        .collect();
    Frame::new(data, WIDTH, HEIGHT, sequence)
}

/// Uniform grey: fails the sharpness and contrast floors.
pub fn flat_frame(sequence: u64) -> Frame {
    Frame::new(vec![128; (WIDTH * HEIGHT) as usize], WIDTH, HEIGHT, sequence)
}

/// Session settings that accept a face on its first frame.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        liveness_required: false,
        require_stable_face: false,
        required_samples: 5,
        session_timeout: Duration::from_secs(30),
        ..SessionConfig::default()
    }
}

/// Reports one face, centred, covering 3/8 of the frame width.
#[derive(Default)]
pub struct CenteredDetector {
    pub calls: AtomicUsize,
}

#[async_trait]
impl FaceDetector for CenteredDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let size = frame.width as f32 * 0.375;
        Ok(vec![BoundingBox::new(
            (frame.width as f32 - size) / 2.0,
            (frame.height as f32 - size) / 2.0,
            size,
            size,
            0.95,
        )])
    }
}

/// Returns whatever descriptor it is currently set to.
pub struct FixedExtractor {
    values: Mutex<Vec<f32>>,
    delay: Option<Duration>,
    failing: AtomicBool,
}

impl FixedExtractor {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values: Mutex::new(values),
            delay: None,
            failing: AtomicBool::new(false),
        }
    }

    pub fn slow(values: Vec<f32>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(values)
        }
    }

    pub fn set(&self, values: Vec<f32>) {
        *self.values.lock().unwrap() = values;
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingExtractor for FixedExtractor {
    async fn extract(
        &self,
        _frame: &Frame,
        _face: &BoundingBox,
    ) -> Result<Extraction, ExtractionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ExtractionError::Failed("model crashed".into()));
        }
        Ok(Extraction {
            descriptor: Descriptor::new(self.values.lock().unwrap().clone()),
            confidence: 0.9,
        })
    }
}

pub struct TestContext {
    pub handle: SessionHandle,
    pub store: Arc<MemoryIdentityStore>,
    pub cipher: Arc<AesGcmCipher>,
    pub detector: Arc<CenteredDetector>,
    pub extractor: Arc<FixedExtractor>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with(test_config(), FixedExtractor::new(vec![1.0, 0.0, 0.0])).await
    }

    /// Build and configure an orchestrator around in-memory collaborators.
    pub async fn with(config: SessionConfig, extractor: FixedExtractor) -> Self {
        init_tracing();
        let store = Arc::new(MemoryIdentityStore::new());
        let cipher = Arc::new(AesGcmCipher::new(b"integration-test-key"));
        let detector = Arc::new(CenteredDetector::default());
        let extractor = Arc::new(extractor);

        let handle = Orchestrator::builder()
            .config(config)
            .detector(detector.clone())
            .extractor(extractor.clone())
            .store(store.clone())
            .cipher(cipher.clone())
            .build()
            .unwrap();
        let events = handle.subscribe();
        handle.configure().await.unwrap();

        Self {
            handle,
            store,
            cipher,
            detector,
            extractor,
            events,
        }
    }

    /// Store an identity directly, bypassing enrollment. Returns its id.
    pub async fn seed_identity(&self, name: &str, samples: &[Vec<f32>]) -> String {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let descriptors = samples
            .iter()
            .map(|values| self.cipher.encrypt(&Descriptor::new(values.clone())).unwrap())
            .collect::<Vec<_>>();
        self.store
            .add(IdentityRecord {
                metadata: IdentityMetadata {
                    id: id.clone(),
                    display_name: name.to_string(),
                    created_at: now,
                    updated_at: now,
                    sample_count: descriptors.len(),
                },
                descriptors,
            })
            .await
            .unwrap();
        id
    }

    /// Submit a textured frame and wait until the session has handled or dropped it.
    pub async fn feed(&mut self, sequence: u64) -> SessionEvent {
        self.feed_frame(textured_frame(sequence)).await
    }

    pub async fn feed_frame(&mut self, frame: Frame) -> SessionEvent {
        let sequence = frame.sequence;
        assert!(self.handle.submit_frame(frame), "frame queue full");
        wait_for_event(&mut self.events, |e| match e {
            SessionEvent::FrameHandled { sequence: s }
            | SessionEvent::FrameDropped { sequence: s, .. } => *s == sequence,
            _ => false,
        })
        .await
    }
}

pub async fn wait_for_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Everything currently queued on `events`.
pub fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
