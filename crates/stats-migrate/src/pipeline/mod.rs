//! Migration jobs: the one-shot backfill and the resumable impression export.
//!
//! Both jobs share the same shape: resume from the cursor watermark, walk
//! the source in scroll batches, transform, write idempotently, then
//! checkpoint. Delivery is at-least-once; the writer's conflict handling
//! absorbs the replays.

mod backfill;
mod impressions;

pub use backfill::{BackfillJob, BackfillReport};
pub use impressions::{ImpressionExportJob, ImpressionReport};

use crate::source::SourceEvent;
use crate::transform::{parse_timestamp, ImpressionRow};
use chrono::{DateTime, Utc};

/// Advance a cursor watermark from a processed batch.
///
/// Only raw timestamps that actually parse may move the watermark; a
/// record whose `createdAt` is unparsable gets a wall-clock row value in
/// the target but must never push the checkpoint forward, or a resume
/// would skip everything between the real watermark and now. A batch
/// whose tail records are all unparsable keeps the previous watermark.
fn advance_watermark(
    events: &[SourceEvent],
    previous: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    events
        .iter()
        .rev()
        .find_map(|e| parse_timestamp(e.field("createdAt")))
        .or(previous)
}

/// Result of writing one impression batch, partitioned into acknowledged
/// ids and attributed failures.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub rows_written: u64,
    pub success_ids: Vec<String>,
    pub failures: Vec<(String, String)>,
}

impl BatchOutcome {
    /// All rows in the batch were acknowledged by the target.
    pub fn written(rows: &[ImpressionRow], rows_written: u64) -> Self {
        Self {
            rows_written,
            success_ids: rows.iter().map(|r| r.id.clone()).collect(),
            failures: Vec::new(),
        }
    }

    /// The whole batch failed to write; every id gets the same reason.
    pub fn failed(rows: &[ImpressionRow], reason: &str) -> Self {
        Self {
            rows_written: 0,
            success_ids: Vec::new(),
            failures: rows
                .iter()
                .map(|r| (r.id.clone(), reason.to_string()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::EventStatus;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(id: &str) -> ImpressionRow {
        ImpressionRow {
            id: id.into(),
            from_partner_id: 1,
            to_partner_id: 2,
            mission_id: None,
            campaign_id: None,
            widget_id: None,
            status: EventStatus::Pending,
            created_at: Utc::now(),
            session_id: None,
        }
    }

    #[test]
    fn test_written_outcome_collects_all_ids() {
        let rows = vec![row("a"), row("b")];
        let outcome = BatchOutcome::written(&rows, 1);
        assert_eq!(outcome.success_ids, vec!["a", "b"]);
        assert_eq!(outcome.rows_written, 1);
        assert!(outcome.failures.is_empty());
    }

    fn event(id: &str, created_at: serde_json::Value) -> SourceEvent {
        SourceEvent::new(id.to_string(), json!({ "createdAt": created_at }))
    }

    #[test]
    fn test_watermark_advances_from_last_parsed_timestamp() {
        let events = vec![
            event("a", json!("2024-03-05T10:00:00Z")),
            event("b", json!("2024-03-05T11:00:00Z")),
        ];
        let watermark = advance_watermark(&events, None);
        assert_eq!(
            watermark,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 11, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_garbage_tail_timestamp_keeps_previous_watermark() {
        let previous = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let events = vec![event("a", json!("not-a-date"))];

        // The dirty record gets a wall-clock row value downstream, but the
        // checkpoint must not jump past unprocessed history.
        let watermark = advance_watermark(&events, Some(previous));
        assert_eq!(watermark, Some(previous));

        let watermark = advance_watermark(&events, None);
        assert_eq!(watermark, None);
    }

    #[test]
    fn test_watermark_skips_unparsable_tail_records() {
        let events = vec![
            event("a", json!("2024-03-05T10:00:00Z")),
            event("b", json!("garbage")),
        ];
        let watermark = advance_watermark(&events, None);
        assert_eq!(
            watermark,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_failed_outcome_attributes_reason_to_every_id() {
        let rows = vec![row("a"), row("b")];
        let outcome = BatchOutcome::failed(&rows, "connection reset");
        assert!(outcome.success_ids.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0], ("a".to_string(), "connection reset".to_string()));
    }
}
