use std::sync::Arc;

use tokio::sync::watch;

use vidgrep_decoder::{Backend, Configuration};
use vidgrep_ocr::{DynOcrEngine, WorkerConfig, WorkerOcrEngine, initialize_engine};
use vidgrep_types::FrameError;

use crate::pipeline::{PipelineConfig, RecognizerConfig, RunError, RunSummary, run_pipeline};

/// One extraction run: a decoder configuration, whether that backend choice
/// is pinned, and the pipeline settings shared across failover attempts.
pub struct ExecutionPlan {
    configuration: Configuration,
    backend_locked: bool,
    pipeline: PipelineConfig,
}

impl ExecutionPlan {
    pub fn new(
        configuration: Configuration,
        backend_locked: bool,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            configuration,
            backend_locked,
            pipeline,
        }
    }

    /// Runs the pipeline, falling over to another compiled decoder backend
    /// when the current one fails before producing a single frame. A pinned
    /// backend never falls over. The recognition engine is built once and
    /// reused across attempts.
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<RunSummary, RunError> {
        let available = Configuration::available_backends();
        if available.is_empty() {
            return Err(RunError::Frame(FrameError::unsupported("any")));
        }
        if self.backend_locked && !available.contains(&self.configuration.backend) {
            return Err(RunError::Frame(FrameError::unsupported(
                self.configuration.backend.as_str(),
            )));
        }

        let mut configuration = self.configuration;
        let mut engine: Option<DynOcrEngine> = None;
        let mut tried: Vec<Backend> = Vec::new();

        loop {
            if !tried.contains(&configuration.backend) {
                tried.push(configuration.backend);
            }
            let provider = match configuration.create_provider() {
                Ok(provider) => provider,
                Err(err) => {
                    if !self.backend_locked {
                        if let Some(next) = select_next_backend(&tried, &available) {
                            tracing::warn!(
                                backend = configuration.backend.as_str(),
                                error = %err,
                                "decoder backend failed to open, trying the next one"
                            );
                            configuration.backend = next;
                            continue;
                        }
                    }
                    return Err(RunError::Frame(err));
                }
            };

            let active_engine = match engine.clone() {
                Some(existing) => existing,
                None => {
                    let built = build_recognizer(&self.pipeline.recognizer)?;
                    engine = Some(built.clone());
                    built
                }
            };

            match run_pipeline(provider, active_engine, &self.pipeline, cancel.clone()).await {
                Ok(summary) => return Ok(summary),
                Err((err, processed)) => {
                    let retry = matches!(err, RunError::Frame(_))
                        && processed == 0
                        && !self.backend_locked;
                    if retry {
                        if let Some(next) = select_next_backend(&tried, &available) {
                            tracing::warn!(
                                backend = configuration.backend.as_str(),
                                error = %err,
                                "decoder backend produced no frames, trying the next one"
                            );
                            configuration.backend = next;
                            continue;
                        }
                    }
                    return Err(err);
                }
            }
        }
    }
}

fn build_recognizer(config: &RecognizerConfig) -> Result<DynOcrEngine, RunError> {
    let selection = initialize_engine(config.preference, |device| {
        let mut worker = WorkerConfig::new(config.worker.clone(), device);
        worker.language = Some(config.language.clone());
        let engine = WorkerOcrEngine::spawn(&worker)?;
        Ok(Arc::new(engine) as DynOcrEngine)
    })?;
    for failure in &selection.rejected {
        tracing::warn!(
            device = failure.device.as_str(),
            class = failure.class.as_str(),
            "recognition device rejected: {}",
            failure.message
        );
    }
    tracing::info!(device = selection.device.as_str(), "recognition engine ready");
    Ok(selection.engine)
}

fn select_next_backend(tried: &[Backend], available: &[Backend]) -> Option<Backend> {
    available
        .iter()
        .copied()
        .find(|backend| !tried.contains(backend))
}

pub fn display_available_backends() {
    let available = Configuration::available_backends();
    if available.is_empty() {
        println!("no decoder backends available in this build");
        return;
    }
    println!("available decoder backends:");
    for backend in available {
        println!("  {backend}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_backend_skips_already_tried() {
        let available = vec![Backend::Ffmpeg, Backend::Mock];
        assert_eq!(select_next_backend(&[], &available), Some(Backend::Ffmpeg));
        assert_eq!(
            select_next_backend(&[Backend::Ffmpeg], &available),
            Some(Backend::Mock)
        );
        assert_eq!(
            select_next_backend(&[Backend::Ffmpeg, Backend::Mock], &available),
            None
        );
    }
}
