pub mod backends;
pub mod config;
pub mod core;

pub use config::{Backend, Configuration};
pub use core::{
    DynFrameProvider, FrameError, FrameProvider, FrameResult, FrameStream, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};
