use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use vidgrep_store::{Database, PersistedRecord, StoreError};
use vidgrep_types::format_mmss;

pub const DEFAULT_SEARCH_LIMIT: u64 = 200;
pub const DEFAULT_PAGE_SIZE: u64 = 100;
/// Shift between the recording clock and the source broadcast clock,
/// applied to display strings only.
pub const DEFAULT_DISPLAY_OFFSET_SECONDS: u64 = 19 * 60 + 20;

/// Assumed frame rate when a progress row predates fps tracking.
const FALLBACK_FPS: f64 = 24.0;

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub search_limit: u64,
    pub page_size: u64,
    pub display_offset_seconds: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            search_limit: DEFAULT_SEARCH_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            display_offset_seconds: DEFAULT_DISPLAY_OFFSET_SECONDS,
        }
    }
}

/// A stored record plus its display-time rendering. `display_time_str`
/// carries the configured offset; the stored timestamp never does.
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    pub id: i64,
    pub name: String,
    pub timestamp_seconds: f64,
    pub timestamp_str: String,
    pub display_time_str: String,
    pub created_at: DateTime<Utc>,
}

impl RecordView {
    fn new(record: PersistedRecord, offset_seconds: u64) -> Self {
        let display_time_str = format_mmss(record.timestamp_seconds + offset_seconds as f64);
        Self {
            id: record.id,
            name: record.name,
            timestamp_seconds: record.timestamp_seconds,
            timestamp_str: record.timestamp_str,
            display_time_str,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    pub query: String,
    pub total_count: u64,
    pub is_limited: bool,
    pub records: Vec<RecordView>,
}

#[derive(Debug, Serialize)]
pub struct ListingPage {
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
    pub records: Vec<RecordView>,
}

/// Progress as reported to pollers. A store no pipeline has ever touched
/// reports `not_started` with the frame fields omitted.
#[derive(Debug, Serialize)]
pub struct ProgressReport {
    pub status: String,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_frames: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_frame: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time_str: Option<String>,
    pub records_count: u64,
}

/// Read-only view over a store the extraction pipeline may still be
/// writing to. Never blocks the writer and never observes a partial
/// frame batch.
pub struct QueryService {
    db: Database,
    config: QueryConfig,
}

impl QueryService {
    pub async fn open(path: impl AsRef<Path>, config: QueryConfig) -> Result<Self, StoreError> {
        let db = Database::open_reader(path).await?;
        Ok(Self { db, config })
    }

    pub fn with_database(db: Database, config: QueryConfig) -> Self {
        Self { db, config }
    }

    /// Substring search over recorded text. A blank query returns an empty
    /// outcome without touching the store.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome, StoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(SearchOutcome {
                query: String::new(),
                total_count: 0,
                is_limited: false,
                records: Vec::new(),
            });
        }

        let total_count = self.db.count_matching(query).await?;
        let records = self
            .db
            .search_by_name(query, self.config.search_limit)
            .await?;
        Ok(SearchOutcome {
            query: query.to_owned(),
            total_count,
            is_limited: total_count > self.config.search_limit,
            records: self.render(records),
        })
    }

    /// One page of the full listing, ordered by timestamp. Pages are
    /// 1-based; zero is treated as the first page and a page past the end
    /// comes back empty with the page math intact.
    pub async fn list_page(&self, page: u64) -> Result<ListingPage, StoreError> {
        let page = page.max(1);
        let page_size = self.config.page_size.max(1);
        let (records, total_count) = self.db.list_page(page, page_size).await?;
        Ok(ListingPage {
            page,
            page_size,
            total_count,
            total_pages: total_count.div_ceil(page_size),
            records: self.render(records),
        })
    }

    pub async fn progress_report(&self) -> Result<ProgressReport, StoreError> {
        let records_count = self.db.records_count().await?;
        let Some(state) = self.db.progress_snapshot().await? else {
            return Ok(ProgressReport {
                status: "not_started".to_owned(),
                percent: 0.0,
                total_frames: None,
                current_frame: None,
                fps: None,
                current_time_str: None,
                records_count,
            });
        };

        let fps = if state.fps > 0.0 {
            state.fps
        } else {
            FALLBACK_FPS
        };
        let elapsed_seconds = state.current_frame as f64 / fps;
        Ok(ProgressReport {
            status: state.status.to_string(),
            percent: state.percent(),
            total_frames: Some(state.total_frames),
            current_frame: Some(state.current_frame),
            fps: Some(state.fps),
            current_time_str: Some(format_elapsed(elapsed_seconds)),
            records_count,
        })
    }

    fn render(&self, records: Vec<PersistedRecord>) -> Vec<RecordView> {
        records
            .into_iter()
            .map(|record| RecordView::new(record, self.config.display_offset_seconds))
            .collect()
    }
}

fn format_elapsed(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}
