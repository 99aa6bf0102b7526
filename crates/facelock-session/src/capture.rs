//! Capture source that replays a prepared frame sequence.

use crate::collaborators::{CaptureError, CaptureSource, FrameSink};
use async_trait::async_trait;
use facelock_hw::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Feeds `frames` into the session at a fixed interval, restamping each
/// frame's timestamp on emission so they stay monotonic.
pub struct ReplaySource {
    frames: Vec<Frame>,
    interval: Duration,
    opened: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplaySource {
    pub fn new(frames: Vec<Frame>, interval: Duration) -> Self {
        Self {
            frames,
            interval,
            opened: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[async_trait]
impl CaptureSource for ReplaySource {
    async fn open(&self) -> Result<(), CaptureError> {
        if self.frames.is_empty() {
            return Err(CaptureError::Unavailable("nothing to replay".into()));
        }
        self.opened.store(true, Ordering::Release);
        Ok(())
    }

    async fn start(&self, sink: FrameSink) -> Result<(), CaptureError> {
        if !self.opened.load(Ordering::Acquire) {
            return Err(CaptureError::Failed("replay source not opened".into()));
        }
        let frames = self.frames.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let total = frames.len();
            for mut frame in frames {
                ticker.tick().await;
                if sink.is_closed() {
                    break;
                }
                frame.timestamp = std::time::Instant::now();
                sink.submit(frame);
            }
            tracing::debug!(frames = total, "replay finished");
        });

        if let Some(previous) = self.task.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), CaptureError> {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}
