mod backends;
mod engine;
mod error;
mod payload;
mod select;

pub use backends::mock::MockOcrEngine;
pub use backends::worker::{Device, WorkerConfig, WorkerOcrEngine};
pub use engine::{DynOcrEngine, OcrEngine};
pub use error::OcrError;
pub use payload::{DocumentRecognition, LineRecognition, RecognitionPayload, parse_payload};
pub use select::{
    DevicePreference, EngineSelection, FailureClass, InitFailure, classify_failure,
    initialize_engine,
};
