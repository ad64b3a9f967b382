use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_stream::StreamExt;

use vidgrep_decoder::DynFrameProvider;
use vidgrep_ocr::{DevicePreference, DynOcrEngine, OcrError, RecognitionPayload};
use vidgrep_store::{Database, RunStatus, StoreError};
use vidgrep_types::{FrameError, LumaFrame};

use crate::filter::ConfidenceFilter;
use crate::progress::ConsoleProgress;
use crate::sampler::FrameSampler;
use crate::settings::EffectiveSettings;

/// How the recognition engine is constructed. Kept separate from the
/// per-attempt pipeline state so one engine can outlive decoder failover.
#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    pub preference: DevicePreference,
    pub worker: PathBuf,
    pub language: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database: PathBuf,
    pub stride: NonZeroU64,
    pub confidence_threshold: f32,
    pub recognition_timeout: Duration,
    pub label: String,
    pub recognizer: RecognizerConfig,
}

impl PipelineConfig {
    pub fn from_settings(settings: &EffectiveSettings) -> Self {
        Self {
            database: settings.database.clone(),
            stride: settings.stride,
            confidence_threshold: settings.confidence_threshold,
            recognition_timeout: settings.recognition_timeout,
            label: "vidgrep".to_string(),
            recognizer: RecognizerConfig {
                preference: settings.ocr_device,
                worker: settings.ocr_worker.clone(),
                language: settings.ocr_language.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub decoded_frames: u64,
    pub sampled_frames: u64,
    pub rows_written: u64,
}

#[derive(Debug)]
pub enum RunError {
    Frame(FrameError),
    Recognition(OcrError),
    Store(StoreError),
    RecognitionTimeout { seconds: u64 },
    Cancelled,
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Frame(err) => write!(f, "{err}"),
            RunError::Recognition(err) => write!(f, "{err}"),
            RunError::Store(err) => write!(f, "{err}"),
            RunError::RecognitionTimeout { seconds } => {
                write!(f, "recognition timed out after {seconds}s")
            }
            RunError::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Frame(err) => Some(err),
            RunError::Recognition(err) => Some(err),
            RunError::Store(err) => Some(err),
            RunError::RecognitionTimeout { .. } => None,
            RunError::Cancelled => None,
        }
    }
}

impl From<FrameError> for RunError {
    fn from(err: FrameError) -> Self {
        RunError::Frame(err)
    }
}

impl From<OcrError> for RunError {
    fn from(err: OcrError) -> Self {
        RunError::Recognition(err)
    }
}

impl From<StoreError> for RunError {
    fn from(err: StoreError) -> Self {
        RunError::Store(err)
    }
}

/// Resolves when the cancel flag flips to true. Pends forever if the sender
/// is gone, so a dropped handle never reads as a cancellation.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs one recognition call on the blocking pool under a deadline and the
/// shutdown signal. The engine owns worker liveness; a timeout here fails the
/// run rather than stalling it.
async fn recognize_frame(
    engine: &DynOcrEngine,
    frame: LumaFrame,
    timeout: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> Result<RecognitionPayload, RunError> {
    let name = engine.name();
    let engine = engine.clone();
    let mut task = tokio::task::spawn_blocking(move || engine.recognize(&frame));
    tokio::select! {
        joined = &mut task => match joined {
            Ok(result) => result.map_err(RunError::Recognition),
            Err(_) => Err(RunError::Recognition(OcrError::backend(
                name,
                "recognition task panicked",
            ))),
        },
        _ = tokio::time::sleep(timeout) => Err(RunError::RecognitionTimeout {
            seconds: timeout.as_secs(),
        }),
        _ = cancelled(cancel) => Err(RunError::Cancelled),
    }
}

async fn abort_run(
    database: &Database,
    progress: &ConsoleProgress,
    last_index: u64,
    err: RunError,
    decoded: u64,
) -> (RunError, u64) {
    progress.fail(&err.to_string());
    if let Err(store_err) = database.update_progress(last_index, RunStatus::Failed).await {
        tracing::warn!(error = %store_err, "could not record failed status");
    }
    (err, decoded)
}

/// Drives one full extraction attempt over a single frame provider: sample at
/// the configured stride, recognize, filter, append, and track progress. The
/// error side carries how many frames were decoded so the caller can decide
/// whether switching decoder backends is worthwhile.
pub async fn run_pipeline(
    provider: DynFrameProvider,
    engine: DynOcrEngine,
    config: &PipelineConfig,
    mut cancel: watch::Receiver<bool>,
) -> Result<RunSummary, (RunError, u64)> {
    let metadata = provider.metadata();
    let fps = metadata.fps.unwrap_or(0.0);
    let mut sampler = match FrameSampler::new(config.stride, fps) {
        Ok(sampler) => sampler,
        Err(err) => return Err((RunError::Frame(err), 0)),
    };
    let filter = ConfidenceFilter::new(config.confidence_threshold);
    let total_frames = metadata.total_frames;

    let database = match Database::open(&config.database).await {
        Ok(database) => database,
        Err(err) => return Err((RunError::Store(err), 0)),
    };
    if let Err(err) = database
        .reset_progress(total_frames.unwrap_or(0), fps)
        .await
    {
        return Err((RunError::Store(err), 0));
    }

    let mut progress = ConsoleProgress::new(total_frames);
    progress.set_prefix(config.label.clone());

    let mut stream = provider.into_stream();
    let mut decoded: u64 = 0;
    let mut sampled: u64 = 0;
    let mut rows_written: u64 = 0;
    let mut last_index: u64 = 0;

    loop {
        if *cancel.borrow() {
            return Err(
                abort_run(&database, &progress, last_index, RunError::Cancelled, decoded).await,
            );
        }
        let next = tokio::select! {
            item = stream.next() => item,
            _ = cancelled(&mut cancel) => {
                return Err(
                    abort_run(&database, &progress, last_index, RunError::Cancelled, decoded)
                        .await,
                );
            }
        };
        let Some(item) = next else { break };
        let frame = match item {
            Ok(frame) => frame,
            Err(err) => {
                return Err(
                    abort_run(&database, &progress, last_index, RunError::Frame(err), decoded)
                        .await,
                );
            }
        };
        decoded = decoded.saturating_add(1);
        let frame_index = frame.frame_index();
        progress.observe_frame(frame_index);
        let Some(point) = sampler.observe(frame_index) else {
            continue;
        };
        last_index = point.index;

        // Progress is written ahead of recognition so a stalled or crashed
        // worker still leaves the frame position visible to readers.
        if let Err(err) = database.update_progress(point.index, RunStatus::Running).await {
            return Err(
                abort_run(&database, &progress, last_index, RunError::Store(err), decoded).await,
            );
        }

        sampled = sampled.saturating_add(1);
        let started = Instant::now();
        let payload =
            match recognize_frame(&engine, frame, config.recognition_timeout, &mut cancel).await {
                Ok(payload) => payload,
                Err(RunError::Recognition(err)) if err.is_parse() => {
                    tracing::warn!(frame = point.index, error = %err, "skipping malformed recognition reply");
                    progress.observe_recognition(started.elapsed(), 0);
                    continue;
                }
                Err(err) => {
                    return Err(
                        abort_run(&database, &progress, last_index, err, decoded).await,
                    );
                }
            };
        let candidates = match payload.into_candidates() {
            Ok(candidates) => candidates,
            Err(err) if err.is_parse() => {
                tracing::warn!(frame = point.index, error = %err, "skipping mismatched recognition payload");
                progress.observe_recognition(started.elapsed(), 0);
                continue;
            }
            Err(err) => {
                return Err(abort_run(
                    &database,
                    &progress,
                    last_index,
                    RunError::Recognition(err),
                    decoded,
                )
                .await);
            }
        };
        let accepted = filter.filter(candidates);
        let inserted = match database
            .append_batch(&accepted, point.timestamp_seconds, &point.timestamp_str)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                return Err(
                    abort_run(&database, &progress, last_index, RunError::Store(err), decoded)
                        .await,
                );
            }
        };
        rows_written = rows_written.saturating_add(inserted);
        progress.observe_recognition(started.elapsed(), inserted);
    }

    let final_frame = total_frames.unwrap_or(decoded);
    if let Err(err) = database.update_progress(final_frame, RunStatus::Completed).await {
        progress.fail(&err.to_string());
        return Err((RunError::Store(err), decoded));
    }
    progress.finish();
    tracing::info!(
        decoded,
        sampled,
        rows = rows_written,
        "extraction run completed"
    );
    Ok(RunSummary {
        decoded_frames: decoded,
        sampled_frames: sampled,
        rows_written,
    })
}
