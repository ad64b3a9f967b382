#![cfg(feature = "backend-ffmpeg")]

use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg::util::error::{EAGAIN, EWOULDBLOCK};
use ffmpeg_next as ffmpeg;
use tokio::sync::mpsc;

use crate::core::{
    DynFrameProvider, FrameError, FrameProvider, FrameResult, FrameStream, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};

const BACKEND_NAME: &str = "ffmpeg";
const DEFAULT_CHANNEL_CAPACITY: usize = 8;

pub struct FfmpegProvider {
    input: PathBuf,
    metadata: VideoMetadata,
    channel_capacity: usize,
}

impl FfmpegProvider {
    pub fn open<P: AsRef<Path>>(path: P, channel_capacity: Option<usize>) -> FrameResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FrameError::video_unavailable(
                path.display().to_string(),
                "file does not exist",
            ));
        }
        ffmpeg::init()
            .map_err(|err| FrameError::backend_failure(BACKEND_NAME, err.to_string()))?;
        let metadata = probe_metadata(path)?;
        Ok(Self {
            input: path.to_path_buf(),
            metadata,
            channel_capacity: channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY).max(1),
        })
    }

    fn decode_loop(&self, tx: mpsc::Sender<FrameResult<LumaFrame>>) -> FrameResult<()> {
        let mut ictx = ffmpeg::format::input(&self.input)
            .map_err(|err| FrameError::backend_failure(BACKEND_NAME, err.to_string()))?;
        let input_stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| FrameError::backend_failure(BACKEND_NAME, "no video stream found"))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|err| FrameError::backend_failure(BACKEND_NAME, err.to_string()))?;
        let mut decoder = context
            .decoder()
            .video()
            .map_err(|err| FrameError::backend_failure(BACKEND_NAME, err.to_string()))?;

        let target_format = ffmpeg::format::pixel::Pixel::YUV420P;
        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            target_format,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::FAST_BILINEAR,
        )
        .map_err(|err| FrameError::backend_failure(BACKEND_NAME, err.to_string()))?;

        let mut decoded = ffmpeg::util::frame::Video::empty();
        let mut converted = ffmpeg::util::frame::Video::empty();
        let mut emitted: u64 = 0;

        let mut drain = |decoder: &mut ffmpeg::decoder::Video,
                         emitted: &mut u64|
         -> FrameResult<()> {
            loop {
                match decoder.receive_frame(&mut decoded) {
                    Ok(_) => {
                        scaler.run(&decoded, &mut converted).map_err(|err| {
                            FrameError::backend_failure(BACKEND_NAME, err.to_string())
                        })?;
                        converted.set_pts(decoded.pts());
                        let frame = luma_from_converted(&converted, time_base)?
                            .with_frame_index(Some(*emitted));
                        *emitted += 1;
                        if tx.blocking_send(Ok(frame)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        if is_retryable_error(&err) || matches!(err, ffmpeg::Error::Eof) {
                            break;
                        }
                        return Err(FrameError::backend_failure(BACKEND_NAME, err.to_string()));
                    }
                }
            }
            Ok(())
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_index {
                continue;
            }
            if let Err(err) = decoder.send_packet(&packet) {
                if !is_retryable_error(&err) {
                    return Err(FrameError::backend_failure(BACKEND_NAME, err.to_string()));
                }
            }
            drain(&mut decoder, &mut emitted)?;
        }

        decoder
            .send_eof()
            .map_err(|err| FrameError::backend_failure(BACKEND_NAME, err.to_string()))?;
        drain(&mut decoder, &mut emitted)?;
        Ok(())
    }
}

impl FrameProvider for FfmpegProvider {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn into_stream(self: Box<Self>) -> FrameStream {
        let provider = *self;
        let capacity = provider.channel_capacity;
        spawn_stream_from_channel(capacity, move |tx| {
            let result = provider.decode_loop(tx.clone());
            if let Err(err) = result {
                let _ = tx.blocking_send(Err(err));
            }
        })
    }
}

fn probe_metadata(path: &Path) -> FrameResult<VideoMetadata> {
    let ictx = ffmpeg::format::input(&path)
        .map_err(|err| FrameError::video_unavailable(path.display().to_string(), err.to_string()))?;
    let stream = ictx
        .streams()
        .best(ffmpeg::media::Type::Video)
        .ok_or_else(|| {
            FrameError::video_unavailable(path.display().to_string(), "no video stream found")
        })?;

    let fps =
        rational_to_fps(stream.avg_frame_rate()).or_else(|| rational_to_fps(stream.rate()));
    let duration = if ictx.duration() > 0 {
        Some(Duration::from_secs_f64(
            ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE),
        ))
    } else {
        None
    };
    let total_frames = if stream.frames() > 0 {
        Some(stream.frames() as u64)
    } else {
        // Containers without a frame count get an estimate from duration.
        match (duration, fps) {
            (Some(duration), Some(fps)) => Some((duration.as_secs_f64() * fps).round() as u64),
            _ => None,
        }
    };

    let (width, height) = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
        .ok()
        .and_then(|context| context.decoder().video().ok())
        .map(|video| (Some(video.width()), Some(video.height())))
        .unwrap_or((None, None));

    Ok(VideoMetadata {
        duration,
        fps,
        width,
        height,
        total_frames,
    })
}

fn rational_to_fps(rate: ffmpeg::Rational) -> Option<f64> {
    if rate.numerator() > 0 && rate.denominator() > 0 {
        Some(f64::from(rate))
    } else {
        None
    }
}

fn luma_from_converted(
    frame: &ffmpeg::util::frame::Video,
    time_base: ffmpeg::Rational,
) -> FrameResult<LumaFrame> {
    let plane = frame.data(0);
    let stride = frame.stride(0) as usize;
    let width = frame.width();
    let height = frame.height();
    let mut buffer = Vec::with_capacity(stride * height as usize);
    for row in 0..height as usize {
        let offset = row * stride;
        buffer.extend_from_slice(&plane[offset..offset + stride]);
    }
    let timestamp = frame.pts().map(|pts| {
        let seconds = pts as f64 * f64::from(time_base);
        Duration::from_secs_f64(seconds.max(0.0))
    });
    LumaFrame::from_owned(width, height, stride, timestamp, buffer)
}

fn is_retryable_error(error: &ffmpeg::Error) -> bool {
    matches!(
        error,
        ffmpeg::Error::Other { errno }
            if *errno == EAGAIN || *errno == EWOULDBLOCK
    )
}

pub fn boxed_ffmpeg<P: AsRef<Path>>(
    path: P,
    channel_capacity: Option<usize>,
) -> FrameResult<DynFrameProvider> {
    Ok(Box::new(FfmpegProvider::open(path, channel_capacity)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_video_unavailable() {
        let result = FfmpegProvider::open("/tmp/nonexistent-file.mp4", None);
        assert!(matches!(
            result,
            Err(FrameError::VideoUnavailable { .. })
        ));
    }
}
