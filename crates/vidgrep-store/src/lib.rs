mod db;
mod error;
mod models;

pub use db::{Database, ImmediateTx, PROGRESS_ROW_ID};
pub use error::StoreError;
pub use models::{PersistedRecord, ProgressState, RunStatus};
