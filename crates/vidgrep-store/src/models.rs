use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::error::StoreError;

/// One accepted text occurrence on the video timeline. Append-only; the
/// pipeline never updates or deletes rows.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct PersistedRecord {
    pub id: i64,
    pub name: String,
    pub timestamp_seconds: f64,
    pub timestamp_str: String,
    pub created_at: DateTime<Utc>,
}

/// The single durable progress row consumed by the read side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    pub total_frames: u64,
    pub current_frame: u64,
    pub fps: f64,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

impl ProgressState {
    /// Completion fraction in percent, rounded to two decimals. Zero when no
    /// frame count is known.
    pub fn percent(&self) -> f64 {
        if self.total_frames == 0 {
            return 0.0;
        }
        let raw = self.current_frame as f64 / self.total_frames as f64 * 100.0;
        (raw * 100.0).round() / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ready,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ready => "ready",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(RunStatus::Ready),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(StoreError::corrupt(format!(
                "unknown progress status '{other}'"
            ))),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
