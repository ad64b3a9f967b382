use std::sync::Arc;

use vidgrep_types::LumaFrame;

use crate::error::OcrError;
use crate::payload::RecognitionPayload;

pub type DynOcrEngine = Arc<dyn OcrEngine>;

/// Common interface for all recognition engines.
///
/// Engines are not assumed safe for concurrent recognition calls; callers
/// serialize access.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn warm_up(&self) -> Result<(), OcrError> {
        Ok(())
    }

    fn recognize(&self, frame: &LumaFrame) -> Result<RecognitionPayload, OcrError>;
}
