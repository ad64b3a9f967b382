use std::num::NonZeroU64;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;

use vidgrep::pipeline::{PipelineConfig, RecognizerConfig, RunError, run_pipeline};
use vidgrep_decoder::DynFrameProvider;
use vidgrep_decoder::backends::mock::MockProvider;
use vidgrep_ocr::{
    DevicePreference, DynOcrEngine, MockOcrEngine, OcrEngine, OcrError, RecognitionPayload,
};
use vidgrep_store::{Database, RunStatus};
use vidgrep_types::LumaFrame;

fn test_config(database: PathBuf, stride: u64, timeout: Duration) -> PipelineConfig {
    PipelineConfig {
        database,
        stride: NonZeroU64::new(stride).expect("nonzero stride"),
        confidence_threshold: 0.8,
        recognition_timeout: timeout,
        label: "test".to_string(),
        recognizer: RecognizerConfig {
            preference: DevicePreference::Auto,
            worker: PathBuf::from("unused-worker"),
            language: "ch".to_string(),
        },
    }
}

fn provider(frames: u64, fps: f64) -> DynFrameProvider {
    Box::new(MockProvider::with_settings(frames, fps, 64, 36))
}

#[tokio::test(flavor = "current_thread")]
async fn full_run_persists_filtered_text_and_completes() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    let engine = Arc::new(MockOcrEngine::new());
    engine.push_document(&[("OPENING", 0.95), ("noise", 0.5)]);
    engine.push_document(&[("五分钟", 0.9)]);
    let config = test_config(db_path.clone(), 120, Duration::from_secs(30));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let summary = run_pipeline(provider(240, 24.0), engine.clone(), &config, cancel_rx)
        .await
        .expect("pipeline run");

    assert_eq!(summary.decoded_frames, 240);
    assert_eq!(summary.sampled_frames, 2);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(engine.calls(), 2);

    let database = Database::open(&db_path).await.expect("open db");
    let (records, total) = database.list_page(1, 100).await.expect("list");
    assert_eq!(total, 2);
    assert_eq!(records[0].name, "OPENING");
    assert_eq!(records[0].timestamp_seconds, 0.0);
    assert_eq!(records[0].timestamp_str, "00:00");
    assert_eq!(records[1].name, "五分钟");
    assert_eq!(records[1].timestamp_seconds, 5.0);
    assert_eq!(records[1].timestamp_str, "00:05");

    let progress = database
        .progress_snapshot()
        .await
        .expect("snapshot")
        .expect("progress row");
    assert_eq!(progress.status, RunStatus::Completed);
    assert_eq!(progress.current_frame, 240);
    assert_eq!(progress.total_frames, 240);
    assert_eq!(progress.fps, 24.0);
}

#[tokio::test(flavor = "current_thread")]
async fn low_confidence_and_short_text_never_persist() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    let engine = Arc::new(MockOcrEngine::new());
    engine.push_document(&[(" a ", 0.99), ("ok", 0.8), ("good enough", 0.81)]);
    let config = test_config(db_path.clone(), 120, Duration::from_secs(30));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let summary = run_pipeline(provider(10, 24.0), engine.clone(), &config, cancel_rx)
        .await
        .expect("pipeline run");

    assert_eq!(summary.sampled_frames, 1);
    assert_eq!(summary.rows_written, 1);

    let database = Database::open(&db_path).await.expect("open db");
    let (records, total) = database.list_page(1, 100).await.expect("list");
    assert_eq!(total, 1);
    assert_eq!(records[0].name, "good enough");
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_reply_skips_the_frame_and_continues() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    let engine = Arc::new(MockOcrEngine::new());
    engine.push_parse_error("gibberish reply");
    engine.push_document(&[("second sample", 0.9)]);
    let config = test_config(db_path.clone(), 120, Duration::from_secs(30));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let summary = run_pipeline(provider(240, 24.0), engine.clone(), &config, cancel_rx)
        .await
        .expect("pipeline run");

    assert_eq!(summary.sampled_frames, 2);
    assert_eq!(summary.rows_written, 1);

    let database = Database::open(&db_path).await.expect("open db");
    let (records, total) = database.list_page(1, 100).await.expect("list");
    assert_eq!(total, 1);
    assert_eq!(records[0].name, "second sample");
    assert_eq!(records[0].timestamp_str, "00:05");

    let progress = database
        .progress_snapshot()
        .await
        .expect("snapshot")
        .expect("progress row");
    assert_eq!(progress.status, RunStatus::Completed);
}

#[tokio::test(flavor = "current_thread")]
async fn recognition_backend_failure_marks_the_run_failed() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    let engine = Arc::new(MockOcrEngine::new());
    engine.push_document(&[("kept", 0.9)]);
    engine.push_backend_error("worker crashed");
    let config = test_config(db_path.clone(), 120, Duration::from_secs(30));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let (err, decoded) = run_pipeline(provider(240, 24.0), engine.clone(), &config, cancel_rx)
        .await
        .expect_err("pipeline should fail");
    assert!(matches!(err, RunError::Recognition(_)));
    assert_eq!(decoded, 121);

    // The position of the failing frame was written ahead of recognition, and
    // the batch committed for the first frame survives the failure.
    let database = Database::open(&db_path).await.expect("open db");
    let progress = database
        .progress_snapshot()
        .await
        .expect("snapshot")
        .expect("progress row");
    assert_eq!(progress.status, RunStatus::Failed);
    assert_eq!(progress.current_frame, 120);

    let (records, total) = database.list_page(1, 100).await.expect("list");
    assert_eq!(total, 1);
    assert_eq!(records[0].name, "kept");
}

#[tokio::test(flavor = "current_thread")]
async fn cancellation_marks_the_run_failed() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    let engine = Arc::new(MockOcrEngine::new());
    let config = test_config(db_path.clone(), 120, Duration::from_secs(30));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    cancel_tx.send(true).expect("send cancel");

    let (err, _) = run_pipeline(provider(240, 24.0), engine.clone(), &config, cancel_rx)
        .await
        .expect_err("pipeline should stop");
    assert!(matches!(err, RunError::Cancelled));
    assert_eq!(engine.calls(), 0);

    let database = Database::open(&db_path).await.expect("open db");
    let progress = database
        .progress_snapshot()
        .await
        .expect("snapshot")
        .expect("progress row");
    assert_eq!(progress.status, RunStatus::Failed);
}

#[tokio::test(flavor = "current_thread")]
async fn frames_with_no_text_write_no_rows() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    // An unscripted engine answers every frame with an empty payload.
    let engine = Arc::new(MockOcrEngine::new());
    let config = test_config(db_path.clone(), 120, Duration::from_secs(30));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let summary = run_pipeline(provider(240, 24.0), engine.clone(), &config, cancel_rx)
        .await
        .expect("pipeline run");

    assert_eq!(summary.sampled_frames, 2);
    assert_eq!(summary.rows_written, 0);

    let database = Database::open(&db_path).await.expect("open db");
    let (records, total) = database.list_page(1, 100).await.expect("list");
    assert!(records.is_empty());
    assert_eq!(total, 0);

    let progress = database
        .progress_snapshot()
        .await
        .expect("snapshot")
        .expect("progress row");
    assert_eq!(progress.status, RunStatus::Completed);
    assert_eq!(progress.current_frame, 240);
}

struct StallingEngine;

impl OcrEngine for StallingEngine {
    fn name(&self) -> &'static str {
        "stalling"
    }

    fn recognize(&self, _frame: &LumaFrame) -> Result<RecognitionPayload, OcrError> {
        std::thread::sleep(Duration::from_millis(400));
        Ok(RecognitionPayload::empty())
    }
}

#[tokio::test(flavor = "current_thread")]
async fn stalled_recognition_times_out() {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("run.db");
    let engine: DynOcrEngine = Arc::new(StallingEngine);
    let config = test_config(db_path.clone(), 1, Duration::from_millis(50));
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let (err, _) = run_pipeline(provider(1, 24.0), engine, &config, cancel_rx)
        .await
        .expect_err("pipeline should time out");
    assert!(matches!(err, RunError::RecognitionTimeout { .. }));

    let database = Database::open(&db_path).await.expect("open db");
    let progress = database
        .progress_snapshot()
        .await
        .expect("snapshot")
        .expect("progress row");
    assert_eq!(progress.status, RunStatus::Failed);
}
