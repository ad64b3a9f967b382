use std::num::NonZeroU64;

use vidgrep_types::{FrameError, FrameResult, format_mmss};

/// One frame elected for recognition, with its position on the video timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePoint {
    pub index: u64,
    pub timestamp_seconds: f64,
    pub timestamp_str: String,
}

/// Elects every `stride`-th frame of the decoded sequence, starting at frame
/// zero, and derives both timeline representations the store persists.
///
/// The timestamp is always `index / fps`; the rate is validated once at
/// construction so the division can never misbehave mid-run.
#[derive(Debug)]
pub struct FrameSampler {
    stride: u64,
    fps: f64,
    seen: u64,
}

impl FrameSampler {
    pub fn new(stride: NonZeroU64, fps: f64) -> FrameResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(FrameError::invalid_frame_rate(fps));
        }
        Ok(Self {
            stride: stride.get(),
            fps,
            seen: 0,
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Offers one decoded frame in stream order. Frames without a decoder
    /// index fall back to their zero-based arrival position.
    pub fn observe(&mut self, frame_index: Option<u64>) -> Option<SamplePoint> {
        self.seen = self.seen.saturating_add(1);
        let index = frame_index.unwrap_or_else(|| self.seen.saturating_sub(1));
        if index % self.stride != 0 {
            return None;
        }
        let timestamp_seconds = index as f64 / self.fps;
        Some(SamplePoint {
            index,
            timestamp_seconds,
            timestamp_str: format_mmss(timestamp_seconds),
        })
    }
}
