use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use vidgrep_types::LumaFrame;

use crate::engine::OcrEngine;
use crate::error::OcrError;
use crate::payload::{DocumentRecognition, LineRecognition, RecognitionPayload};

/// Scripted engine for tests: replies are served in push order, and an
/// exhausted script keeps answering with empty detections.
#[derive(Default)]
pub struct MockOcrEngine {
    script: Mutex<VecDeque<Result<RecognitionPayload, OcrError>>>,
    warm_up_failure: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(replies: Vec<Result<RecognitionPayload, OcrError>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            warm_up_failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_payload(&self, payload: RecognitionPayload) {
        self.push(Ok(payload));
    }

    pub fn push_document(&self, entries: &[(&str, f32)]) {
        self.push(Ok(RecognitionPayload::Document(DocumentRecognition {
            texts: entries.iter().map(|(text, _)| text.to_string()).collect(),
            scores: entries.iter().map(|(_, score)| *score).collect(),
        })));
    }

    pub fn push_lines(&self, entries: &[(&str, f32)]) {
        let lines = entries
            .iter()
            .map(|(text, confidence)| LineRecognition {
                region: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
                text: text.to_string(),
                confidence: *confidence,
            })
            .collect();
        self.push(Ok(RecognitionPayload::Lines(lines)));
    }

    pub fn push_parse_error(&self, reason: &str) {
        self.push(Err(OcrError::parse(reason)));
    }

    pub fn push_backend_error(&self, message: &str) {
        self.push(Err(OcrError::backend("mock", message.to_string())));
    }

    pub fn fail_warm_up(&self, message: &str) {
        if let Ok(mut slot) = self.warm_up_failure.lock() {
            *slot = Some(message.to_string());
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, reply: Result<RecognitionPayload, OcrError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }
}

impl OcrEngine for MockOcrEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn warm_up(&self) -> Result<(), OcrError> {
        let failure = self
            .warm_up_failure
            .lock()
            .map_err(|_| OcrError::backend("mock", "warm-up mutex poisoned"))?
            .clone();
        match failure {
            Some(message) => Err(OcrError::backend("mock", message)),
            None => Ok(()),
        }
    }

    fn recognize(&self, _frame: &LumaFrame) -> Result<RecognitionPayload, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self
            .script
            .lock()
            .map_err(|_| OcrError::backend("mock", "script mutex poisoned"))?;
        match script.pop_front() {
            Some(reply) => reply,
            None => Ok(RecognitionPayload::empty()),
        }
    }
}
