//! facelock-hw: frame model and pixel-level processing.
//!
//! Holds captured luma/depth buffers, computes the image statistics the
//! quality gate needs, applies enhancement, and keeps a ring of recent frames.

pub mod buffer;
pub mod enhance;
pub mod frame;

pub use buffer::{BufferedFrame, FrameBuffer};
pub use enhance::{enhance, Enhancement};
pub use frame::{DepthMap, DepthPatch, Frame, FrameError, LumaPatch, Region};
