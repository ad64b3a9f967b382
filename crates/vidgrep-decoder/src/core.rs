use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use futures_util::stream::unfold;
use tokio::sync::mpsc::{self, Sender};

pub use vidgrep_types::{FrameError, FrameResult, LumaFrame};

pub type FrameStream = Pin<Box<dyn Stream<Item = FrameResult<LumaFrame>> + Send>>;

pub type DynFrameProvider = Box<dyn FrameProvider>;

/// Stream-level description of an opened video source.
///
/// Fields are optional because container metadata is not always trustworthy;
/// consumers decide which absences are fatal for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoMetadata {
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub total_frames: Option<u64>,
}

pub trait FrameProvider: Send + 'static {
    fn metadata(&self) -> VideoMetadata;

    fn into_stream(self: Box<Self>) -> FrameStream;
}

pub fn spawn_stream_from_channel(
    capacity: usize,
    task: impl FnOnce(Sender<FrameResult<LumaFrame>>) + Send + 'static,
) -> FrameStream {
    let (tx, rx) = mpsc::channel(capacity);
    tokio::task::spawn_blocking(move || task(tx));
    let stream = unfold(rx, |mut receiver| async {
        receiver.recv().await.map(|item| (item, receiver))
    });
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test(flavor = "multi_thread")]
    async fn frame_metadata_accessors_work() {
        let frame = LumaFrame::from_owned(4, 2, 4, Some(Duration::from_millis(10)), vec![0; 8])
            .unwrap()
            .with_frame_index(Some(3));
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.stride(), 4);
        assert_eq!(frame.timestamp(), Some(Duration::from_millis(10)));
        assert_eq!(frame.data().len(), 8);
        assert_eq!(frame.frame_index(), Some(3));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn spawn_stream_from_channel_pushes_values() {
        let stream = spawn_stream_from_channel(2, move |tx| {
            tx.blocking_send(Ok(
                LumaFrame::from_owned(2, 2, 2, None, vec![1, 2, 3, 4]).unwrap()
            ))
            .unwrap();
        });
        let mut stream = stream;
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
    }
}
