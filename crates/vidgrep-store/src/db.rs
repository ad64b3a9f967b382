use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use vidgrep_types::TextCandidate;

use crate::error::StoreError;
use crate::models::{PersistedRecord, ProgressState, RunStatus};

/// Fixed key of the single progress row.
pub const PROGRESS_ROW_ID: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_PERMIT_TIMEOUT: Duration = Duration::from_secs(10);
const BEGIN_ATTEMPTS: u32 = 3;
const APPEND_RETRY_BACKOFF: Duration = Duration::from_millis(100);

const CREATE_RECORDS: &str = "\
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    timestamp_seconds REAL NOT NULL,
    timestamp_str TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

const CREATE_RECORDS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_records_timestamp ON records(timestamp_seconds)";

const CREATE_PROGRESS: &str = "\
CREATE TABLE IF NOT EXISTS video_progress (
    id INTEGER PRIMARY KEY,
    total_frames INTEGER NOT NULL DEFAULT 0,
    current_frame INTEGER NOT NULL DEFAULT 0,
    fps REAL NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'ready',
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
)";

/// Transaction wrapper that takes the SQLite write lock upfront with
/// `BEGIN IMMEDIATE`, so a writer never deadlocks upgrading from a deferred
/// read. Rolls back on drop when not committed.
pub struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
    committed: bool,
    _write_permit: Option<OwnedSemaphorePermit>,
}

impl ImmediateTx {
    /// The connection stays `Some` for the guard's whole lifetime; it is only
    /// taken inside `drop`.
    pub fn conn(&mut self) -> &mut PoolConnection<Sqlite> {
        self.conn.as_mut().expect("connection already taken")
    }

    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        if let Some(ref mut conn) = self.conn {
            sqlx::query("COMMIT").execute(&mut **conn).await?;
        }
        self.committed = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        if let Some(ref mut conn) = self.conn {
            sqlx::query("ROLLBACK").execute(&mut **conn).await?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(conn) = self.conn.take() {
                // Detach instead of returning the connection to the pool with
                // an open transaction; SQLite rolls back on close.
                warn!("write transaction dropped without commit, detaching connection");
                let _raw = conn.detach();
            }
        }
    }
}

/// SQLite-backed store shared by the extraction pipeline (writer) and the
/// query side (readers). One writer, many readers; WAL keeps readers on
/// committed snapshots while a batch is in flight.
pub struct Database {
    pool: SqlitePool,
    write_semaphore: Arc<Semaphore>,
}

impl Database {
    /// Opens the writer role: creates the file and schema when missing and
    /// seeds the progress row at `ready`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT)
            .pragma("journal_mode", "WAL")
            // NORMAL is safe under WAL; commits wait for the WAL write only.
            .pragma("synchronous", "NORMAL")
            .pragma("temp_store", "MEMORY");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            write_semaphore: Arc::new(Semaphore::new(1)),
        };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Opens the reader role: never issues DDL or DML. The connection-level
    /// `query_only` pragma enforces that, and a store the pipeline has not
    /// initialized yet reads as empty.
    pub async fn open_reader(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT)
            .pragma("query_only", "ON");
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            write_semaphore: Arc::new(Semaphore::new(1)),
        })
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_RECORDS).execute(&self.pool).await?;
        sqlx::query(CREATE_RECORDS_INDEX).execute(&self.pool).await?;
        sqlx::query(CREATE_PROGRESS).execute(&self.pool).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO video_progress (id, total_frames, current_frame, fps, status, updated_at)
             VALUES (?1, 0, 0, 0, ?2, ?3)",
        )
        .bind(PROGRESS_ROW_ID)
        .bind(RunStatus::Ready.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Starts a write transaction, queueing writers on an in-process
    /// semaphore so at most one holds a pool connection while waiting on
    /// SQLite's busy timeout.
    pub async fn begin_immediate(&self) -> Result<ImmediateTx, StoreError> {
        let permit = match tokio::time::timeout(
            WRITE_PERMIT_TIMEOUT,
            Arc::clone(&self.write_semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::Database(sqlx::Error::PoolClosed)),
            Err(_) => return Err(StoreError::Database(sqlx::Error::PoolTimedOut)),
        };

        let mut last_error = None;
        for attempt in 1..=BEGIN_ATTEMPTS {
            let mut conn = self.pool.acquire().await?;
            match sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await {
                Ok(_) => {
                    return Ok(ImmediateTx {
                        conn: Some(conn),
                        committed: false,
                        _write_permit: Some(permit),
                    });
                }
                Err(err) if is_stuck_transaction(&err) => {
                    // A stuck transaction poisons every later acquire of this
                    // connection; drop it from the pool.
                    warn!(
                        attempt,
                        "BEGIN IMMEDIATE hit a stuck transaction, detaching connection"
                    );
                    let _raw = conn.detach();
                    last_error = Some(err);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Err(err) if attempt < BEGIN_ATTEMPTS && is_busy(&err) => {
                    drop(conn);
                    last_error = Some(err);
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(StoreError::Database(
            last_error.unwrap_or(sqlx::Error::PoolTimedOut),
        ))
    }

    /// Persists all accepted candidates of one sampled frame as a single
    /// atomic unit. Retries the whole batch once after a short backoff, then
    /// aborts; a committed frame is never silently dropped.
    pub async fn append_batch(
        &self,
        accepted: &[TextCandidate],
        timestamp_seconds: f64,
        timestamp_str: &str,
    ) -> Result<u64, StoreError> {
        if accepted.is_empty() {
            return Ok(0);
        }
        match self
            .append_batch_once(accepted, timestamp_seconds, timestamp_str)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(err) => {
                warn!(
                    timestamp_seconds,
                    error = %err,
                    "frame batch write failed, retrying once"
                );
                tokio::time::sleep(APPEND_RETRY_BACKOFF).await;
                self.append_batch_once(accepted, timestamp_seconds, timestamp_str)
                    .await
            }
        }
    }

    async fn append_batch_once(
        &self,
        accepted: &[TextCandidate],
        timestamp_seconds: f64,
        timestamp_str: &str,
    ) -> Result<u64, StoreError> {
        let mut tx = self.begin_immediate().await?;
        let created_at = Utc::now();
        for candidate in accepted {
            sqlx::query(
                "INSERT INTO records (name, timestamp_seconds, timestamp_str, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&candidate.text)
            .bind(timestamp_seconds)
            .bind(timestamp_str)
            .bind(created_at)
            .execute(&mut **tx.conn())
            .await?;
        }
        tx.commit().await?;
        debug!(
            rows = accepted.len(),
            timestamp_seconds, "frame batch committed"
        );
        Ok(accepted.len() as u64)
    }

    pub async fn count_matching(&self, needle: &str) -> Result<u64, StoreError> {
        let result = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records WHERE name LIKE ?1")
            .bind(like_pattern(needle))
            .fetch_one(&self.pool)
            .await;
        match result {
            Ok(count) => Ok(count.max(0) as u64),
            Err(err) if is_missing_table(&err) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn search_by_name(
        &self,
        needle: &str,
        limit: u64,
    ) -> Result<Vec<PersistedRecord>, StoreError> {
        let result = sqlx::query_as::<_, PersistedRecord>(
            "SELECT id, name, timestamp_seconds, timestamp_str, created_at
             FROM records WHERE name LIKE ?1
             ORDER BY timestamp_seconds ASC, id ASC
             LIMIT ?2",
        )
        .bind(like_pattern(needle))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await;
        match result {
            Ok(records) => Ok(records),
            Err(err) if is_missing_table(&err) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    /// Ordered page of the full record set plus the total count. Pages are
    /// 1-based; a page past the end is empty but the count stays correct.
    pub async fn list_page(
        &self,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<PersistedRecord>, u64), StoreError> {
        let total = self.records_count().await?;
        let page = page.max(1);
        let offset = (page - 1).saturating_mul(page_size);
        let result = sqlx::query_as::<_, PersistedRecord>(
            "SELECT id, name, timestamp_seconds, timestamp_str, created_at
             FROM records
             ORDER BY timestamp_seconds ASC, id ASC
             LIMIT ?1 OFFSET ?2",
        )
        .bind(page_size as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await;
        match result {
            Ok(records) => Ok((records, total)),
            Err(err) if is_missing_table(&err) => Ok((Vec::new(), 0)),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn records_count(&self) -> Result<u64, StoreError> {
        let result = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await;
        match result {
            Ok(count) => Ok(count.max(0) as u64),
            Err(err) if is_missing_table(&err) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Starts a run: total and rate are fixed from here on, the cursor drops
    /// to zero, and the status becomes `running`.
    pub async fn reset_progress(&self, total_frames: u64, fps: f64) -> Result<(), StoreError> {
        let mut tx = self.begin_immediate().await?;
        sqlx::query(
            "INSERT INTO video_progress (id, total_frames, current_frame, fps, status, updated_at)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 total_frames = excluded.total_frames,
                 current_frame = 0,
                 fps = excluded.fps,
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(PROGRESS_ROW_ID)
        .bind(total_frames as i64)
        .bind(fps)
        .bind(RunStatus::Running.as_str())
        .bind(Utc::now())
        .execute(&mut **tx.conn())
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Overwrite-semantics progress write: last writer wins.
    pub async fn update_progress(
        &self,
        current_frame: u64,
        status: RunStatus,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin_immediate().await?;
        let outcome = sqlx::query(
            "UPDATE video_progress
             SET current_frame = ?1, status = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(current_frame as i64)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(PROGRESS_ROW_ID)
        .execute(&mut **tx.conn())
        .await?;
        tx.commit().await?;
        if outcome.rows_affected() == 0 {
            return Err(StoreError::corrupt(
                "progress row is missing; reset_progress must run first",
            ));
        }
        Ok(())
    }

    /// Latest durable progress, or `None` when no run has ever initialized
    /// this store.
    pub async fn progress_snapshot(&self) -> Result<Option<ProgressState>, StoreError> {
        let result = sqlx::query_as::<_, ProgressRow>(
            "SELECT total_frames, current_frame, fps, status, updated_at
             FROM video_progress WHERE id = ?1",
        )
        .bind(PROGRESS_ROW_ID)
        .fetch_optional(&self.pool)
        .await;
        let row = match result {
            Ok(row) => row,
            Err(err) if is_missing_table(&err) => None,
            Err(err) => return Err(err.into()),
        };
        row.map(ProgressRow::into_state).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct ProgressRow {
    total_frames: i64,
    current_frame: i64,
    fps: f64,
    status: String,
    updated_at: chrono::DateTime<Utc>,
}

impl ProgressRow {
    fn into_state(self) -> Result<ProgressState, StoreError> {
        Ok(ProgressState {
            total_frames: self.total_frames.max(0) as u64,
            current_frame: self.current_frame.max(0) as u64,
            fps: self.fps,
            status: self.status.parse()?,
            updated_at: self.updated_at,
        })
    }
}

fn like_pattern(needle: &str) -> String {
    format!("%{needle}%")
}

fn is_missing_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("no such table"))
}

fn is_stuck_transaction(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db)
            if db.message().to_lowercase().contains("cannot start a transaction within a transaction")
    )
}

fn is_busy(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if {
            let message = db.message().to_lowercase();
            message.contains("database is locked") || message.contains("busy")
        }
    )
}
