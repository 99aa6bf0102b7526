//! Fixed-size ring of the most recent frames.

use crate::frame::Frame;
use std::collections::VecDeque;
use std::sync::Arc;

/// A buffered frame plus what the pipeline learned about it.
#[derive(Debug, Clone)]
pub struct BufferedFrame {
    pub frame: Arc<Frame>,
    /// Overall quality of the face found in this frame, once processed.
    pub face_quality: Option<f32>,
}

/// Circular buffer of recent frames. Pushing past capacity evicts the oldest entry.
#[derive(Debug)]
pub struct FrameBuffer {
    capacity: usize,
    entries: VecDeque<BufferedFrame>,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, frame: Arc<Frame>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferedFrame {
            frame,
            face_quality: None,
        });
    }

    /// Record the face quality found in the frame with `sequence`, if still buffered.
    pub fn annotate(&mut self, sequence: u64, face_quality: f32) -> bool {
        match self.entries.iter_mut().find(|e| e.frame.sequence == sequence) {
            Some(entry) => {
                entry.face_quality = Some(face_quality);
                true
            }
            None => false,
        }
    }

    /// The buffered frame with a detected face and the highest quality; newest wins ties.
    pub fn best_with_face(&self) -> Option<BufferedFrame> {
        self.entries
            .iter()
            .filter(|e| e.face_quality.is_some())
            .fold(None::<&BufferedFrame>, |best, e| match best {
                Some(b) if b.face_quality > e.face_quality => Some(b),
                _ => Some(e),
            })
            .cloned()
    }

    pub fn latest(&self) -> Option<&BufferedFrame> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
