//! One-shot historical backfill into the `activities` table.

use crate::cursor::{CursorBackend, CursorState};
use crate::error::{MigrateError, Result};
use crate::source::{backfill_query, SourceStore};
use crate::transform::{transform_activity, ActivityRow};
use crate::writer::BatchWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const JOB_NAME: &str = "backfill";

/// Summary of a backfill run.
#[derive(Debug, Serialize)]
pub struct BackfillReport {
    pub batches: u64,
    pub events_seen: u64,
    pub rows_written: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

/// Walks every source document in `createdAt` order and inserts one
/// activity row per document.
///
/// The transform is total, so the only fatal conditions are source,
/// target, and checkpoint errors. Each batch checkpoints only after the
/// target acknowledged the write; a crash between write and checkpoint
/// replays the batch, which the conflict clause absorbs.
pub struct BackfillJob {
    source: SourceStore,
    writer: BatchWriter,
    cursor: Arc<dyn CursorBackend>,
    batch_size: usize,
}

impl BackfillJob {
    pub fn new(
        source: SourceStore,
        writer: BatchWriter,
        cursor: Arc<dyn CursorBackend>,
        batch_size: usize,
    ) -> Self {
        Self {
            source,
            writer,
            cursor,
            batch_size,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<BackfillReport> {
        let started_at = Utc::now();

        let resume_from = self
            .cursor
            .get(JOB_NAME)
            .await?
            .and_then(|s| s.last_created_at);
        match resume_from {
            Some(ts) => info!("Resuming backfill from {}", ts.to_rfc3339()),
            None => info!("Starting backfill from the beginning"),
        }

        let mut scroll = self
            .source
            .scroll(backfill_query(resume_from), self.batch_size);

        let mut batches = 0u64;
        let mut events_seen = 0u64;
        let mut rows_written = 0u64;
        let mut watermark = resume_from;

        while let Some(events) = scroll.next_batch().await? {
            if cancel.is_cancelled() {
                info!("Backfill cancelled after {} batches", batches);
                return Err(MigrateError::Cancelled);
            }

            let rows: Vec<ActivityRow> = events.iter().map(transform_activity).collect();
            events_seen += rows.len() as u64;

            rows_written += self.writer.write_activities(&rows).await?;

            // The scroll sorts by createdAt ascending; only parseable raw
            // timestamps may move the watermark.
            watermark = super::advance_watermark(&events, watermark);
            self.cursor
                .save(&CursorState::at(JOB_NAME, watermark))
                .await?;

            batches += 1;
            debug!(
                "Backfill batch {}: {} events, {} rows written total",
                batches,
                rows.len(),
                rows_written
            );
        }

        let duration_secs =
            (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            "Backfill complete: {} events in {} batches, {} rows written, {:.1}s",
            events_seen, batches, rows_written, duration_secs
        );

        Ok(BackfillReport {
            batches,
            events_seen,
            rows_written,
            watermark,
            duration_secs,
        })
    }
}
