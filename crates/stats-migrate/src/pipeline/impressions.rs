//! Resumable export of print events into the enriched `impressions` table.

use super::BatchOutcome;
use crate::cursor::{CursorBackend, CursorState};
use crate::error::{MigrateError, Result};
use crate::resolver::ReferenceResolver;
use crate::source::{impression_query, SourceStore, StatusAnnotator};
use crate::transform::{transform_impression, ImpressionOutcome, ImpressionRow};
use crate::writer::BatchWriter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const JOB_NAME: &str = "impressions";

/// Summary of an impression export run.
#[derive(Debug, Serialize)]
pub struct ImpressionReport {
    pub batches: u64,
    pub events_seen: u64,
    pub rows_written: u64,
    pub exported: u64,
    pub failed: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub duration_secs: f64,
}

/// Exports pending print events, enriching each with resolved relational
/// foreign keys and writing the export outcome back onto the source
/// document.
///
/// Unlike the backfill, a failed target write is not fatal here: the batch
/// is marked FAILURE on the source side with the error as reason, and the
/// run continues. Marked-FAILURE documents stay outside the SUCCESS filter,
/// so the next run picks them up again. For the same reason the resume
/// query carries no time bound: the cursor watermark is recorded as a
/// progress marker for operators, but resumption is driven entirely by
/// the status filter, which also covers failure-marked records older than
/// any watermark.
pub struct ImpressionExportJob {
    source: SourceStore,
    writer: BatchWriter,
    cursor: Arc<dyn CursorBackend>,
    batch_size: usize,
}

impl ImpressionExportJob {
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

    pub async fn run(
        &self,
        resolver: &mut ReferenceResolver,
        cancel: CancellationToken,
    ) -> Result<ImpressionReport> {
        let started_at = Utc::now();
        let annotator = StatusAnnotator::new(self.source.clone());

        resolver.preload().await?;

        if let Some(ts) = self
            .cursor
            .get(JOB_NAME)
            .await?
            .and_then(|s| s.last_created_at)
        {
            info!("Previous impression export reached {}", ts.to_rfc3339());
        }
        info!("Scanning all print events not yet marked as exported");

        let mut scroll = self
            .source
            .scroll(impression_query(), self.batch_size);

        let mut batches = 0u64;
        let mut events_seen = 0u64;
        let mut rows_written = 0u64;
        let mut exported = 0u64;
        let mut failed = 0u64;
        let mut watermark: Option<DateTime<Utc>> = None;

        while let Some(events) = scroll.next_batch().await? {
            if cancel.is_cancelled() {
                info!("Impression export cancelled after {} batches", batches);
                return Err(MigrateError::Cancelled);
            }

            events_seen += events.len() as u64;

            let mut rows: Vec<ImpressionRow> = Vec::with_capacity(events.len());
            let mut failures: Vec<(String, String)> = Vec::new();

            for event in &events {
                match transform_impression(event, resolver).await? {
                    ImpressionOutcome::Row(row) => rows.push(row),
                    ImpressionOutcome::Unresolvable { source_id, missing } => {
                        failures.push((
                            source_id,
                            format!("unresolved reference: {}", missing),
                        ));
                    }
                }
            }

            let mut outcome = match self.writer.write_impressions(&rows).await {
                Ok(written) => BatchOutcome::written(&rows, written),
                Err(e) => {
                    warn!("Impression batch write failed, marking batch: {}", e);
                    BatchOutcome::failed(&rows, &e.to_string())
                }
            };
            outcome.failures.append(&mut failures);

            annotator.mark_success(&outcome.success_ids).await?;
            annotator.mark_failures(&outcome.failures).await?;

            rows_written += outcome.rows_written;
            exported += outcome.success_ids.len() as u64;
            failed += outcome.failures.len() as u64;

            watermark = super::advance_watermark(&events, watermark);
            self.cursor
                .save(&CursorState::at(JOB_NAME, watermark))
                .await?;

            batches += 1;
            debug!(
                "Impression batch {}: {} events, {} exported, {} failed",
                batches,
                events.len(),
                exported,
                failed
            );
        }

        let duration_secs =
            (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
        info!(
            "Impression export complete: {} events in {} batches, {} exported, {} failed, {:.1}s",
            events_seen, batches, exported, failed, duration_secs
        );

        Ok(ImpressionReport {
            batches,
            events_seen,
            rows_written,
            exported,
            failed,
            watermark,
            duration_secs,
        })
    }
}
