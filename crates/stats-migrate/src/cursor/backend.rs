//! Cursor backend trait.
//!
//! One watermark per migration job, persisted across restarts. Two
//! interchangeable backends implement this interface:
//!
//! - **Db**: key-value table in the target database (`db.rs`)
//! - **File**: local JSON files (`file.rs`)
//!
//! The orchestrating pipelines only ever see `Arc<dyn CursorBackend>`.

use async_trait::async_trait;

use super::CursorState;
use crate::error::Result;

/// Trait for cursor persistence backends.
///
/// Implementations must be `Send + Sync`; the pipelines share them across
/// async tasks. A failed `save` after a committed write batch is fatal to
/// the run: continuing past a lost watermark risks either an infinite
/// reprocessing loop or a gap.
#[async_trait]
pub trait CursorBackend: Send + Sync {
    /// Idempotent bootstrap of the backing table/directory.
    async fn init_schema(&self) -> Result<()>;

    /// Load the cursor for a job, or `None` on first run.
    async fn get(&self, job_name: &str) -> Result<Option<CursorState>>;

    /// Upsert the cursor for its job. Never produces duplicate entries.
    async fn save(&self, state: &CursorState) -> Result<()>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}
