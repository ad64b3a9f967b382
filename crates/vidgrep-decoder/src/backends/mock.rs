use std::env;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::core::{
    DynFrameProvider, FrameError, FrameProvider, FrameResult, FrameStream, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};

const DEFAULT_CHANNEL_CAPACITY: usize = 8;
const DEFAULT_FRAME_COUNT: u64 = 120;
const DEFAULT_FPS: f64 = 24.0;

/// Synthetic finite frame source used by tests and CI runs.
pub struct MockProvider {
    _input: Option<PathBuf>,
    width: u32,
    height: u32,
    stride: usize,
    frame_count: u64,
    fps: f64,
    frame_interval: Duration,
    channel_capacity: usize,
}

impl MockProvider {
    pub fn new(input: Option<PathBuf>, channel_capacity: Option<usize>) -> FrameResult<Self> {
        let frame_count = parse_env_u64("VIDGREP_MOCK_FRAMES")?.unwrap_or(DEFAULT_FRAME_COUNT);
        let fps = parse_env_f64("VIDGREP_MOCK_FPS")?.unwrap_or(DEFAULT_FPS);
        Ok(Self::with_settings(frame_count, fps, 640, 360)
            .input(input)
            .channel_capacity(channel_capacity))
    }

    /// Fully specified constructor for tests that need exact stream shapes.
    pub fn with_settings(frame_count: u64, fps: f64, width: u32, height: u32) -> Self {
        Self {
            _input: None,
            width,
            height,
            stride: width as usize,
            frame_count,
            fps,
            frame_interval: Duration::ZERO,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn input(mut self, input: Option<PathBuf>) -> Self {
        self._input = input;
        self
    }

    pub fn channel_capacity(mut self, capacity: Option<usize>) -> Self {
        self.channel_capacity = capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY).max(1);
        self
    }

    pub fn frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    fn emit_frames(&self, tx: Sender<FrameResult<LumaFrame>>) {
        for index in 0..self.frame_count {
            if tx.is_closed() {
                break;
            }
            let mut buffer = vec![0u8; self.stride * self.height as usize];
            for (row, chunk) in buffer.chunks_mut(self.stride).enumerate() {
                let value = ((row as u64 + index) % 256) as u8;
                chunk.fill(value);
            }
            let timestamp = if self.fps > 0.0 {
                Some(Duration::from_secs_f64(index as f64 / self.fps))
            } else {
                None
            };
            let frame = LumaFrame::from_owned(self.width, self.height, self.stride, timestamp, buffer)
                .map(|frame| frame.with_frame_index(Some(index)));
            if tx.blocking_send(frame).is_err() {
                break;
            }
            if !self.frame_interval.is_zero() {
                thread::sleep(self.frame_interval);
            }
        }
    }
}

impl FrameProvider for MockProvider {
    fn metadata(&self) -> VideoMetadata {
        let duration = if self.fps > 0.0 {
            Some(Duration::from_secs_f64(self.frame_count as f64 / self.fps))
        } else {
            None
        };
        VideoMetadata {
            duration,
            fps: Some(self.fps),
            width: Some(self.width),
            height: Some(self.height),
            total_frames: Some(self.frame_count),
        }
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            provider.emit_frames(tx);
        })
    }
}

pub fn boxed_mock(
    input: Option<PathBuf>,
    channel_capacity: Option<usize>,
) -> FrameResult<DynFrameProvider> {
    Ok(Box::new(MockProvider::new(input, channel_capacity)?))
}

fn parse_env_u64(name: &str) -> FrameResult<Option<u64>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            FrameError::configuration(format!("failed to parse {name}='{raw}' as an integer"))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_env_f64(name: &str) -> FrameResult<Option<f64>> {
    match env::var(name) {
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            FrameError::configuration(format!("failed to parse {name}='{raw}' as a number"))
        }),
        Err(_) => Ok(None),
    }
}
