//! Resumable cursor (watermark) persistence.
//!
//! Every migration job checkpoints a `last_created_at` watermark after
//! each committed batch and resumes from it after a restart. Jobs never
//! share a cursor key.

mod backend;
mod db;
mod file;

pub use backend::CursorBackend;
pub use db::DbCursorBackend;
pub use file::FileCursorBackend;

use crate::config::{CursorBackendKind, MigrationConfig};
use crate::error::Result;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Persisted watermark for one migration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorState {
    /// Migration job this cursor belongs to.
    pub job_name: String,

    /// Creation timestamp of the last fully committed batch's final
    /// record. `None` before the first batch commits.
    pub last_created_at: Option<DateTime<Utc>>,

    /// When this cursor was last written.
    pub updated_at: DateTime<Utc>,
}

impl CursorState {
    /// Cursor positioned at a watermark.
    pub fn at(job_name: impl Into<String>, last_created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            job_name: job_name.into(),
            last_created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Build the configured cursor backend and bootstrap its storage.
pub async fn create_backend(
    config: &MigrationConfig,
    pool: &Pool,
) -> Result<Arc<dyn CursorBackend>> {
    let backend: Arc<dyn CursorBackend> = match config.cursor_backend {
        CursorBackendKind::Db => Arc::new(DbCursorBackend::new(pool.clone())),
        CursorBackendKind::File => Arc::new(FileCursorBackend::new(&config.cursor_dir)),
    };
    backend.init_schema().await?;
    info!("Cursor backend: {}", backend.backend_type());
    Ok(backend)
}
