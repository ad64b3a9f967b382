use thiserror::Error;

use crate::select::InitFailure;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("no usable recognition backend: {}", format_attempts(.attempts))]
    Unavailable { attempts: Vec<InitFailure> },
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("malformed recognition reply: {reason}")]
    Parse { reason: String },
    #[error("recognition worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Parse errors are the only per-frame recoverable failure.
    pub fn is_parse(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

fn format_attempts(attempts: &[InitFailure]) -> String {
    if attempts.is_empty() {
        return "no devices attempted".to_string();
    }
    attempts
        .iter()
        .map(|failure| {
            format!(
                "{} ({}): {}",
                failure.device.as_str(),
                failure.class.as_str(),
                failure.message
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
