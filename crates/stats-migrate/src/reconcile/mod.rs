//! Post-migration consistency checks between the two stores.
//!
//! Aggregate comparison buckets counts per (day, type) on both sides and
//! reports every bucket where they disagree; the union is symmetric, so a
//! bucket present on only one side still shows up, with zero on the other.
//! Spot checks draw random source ids and probe the target for each.

use crate::error::Result;
use crate::source::SourceStore;
use crate::writer::BatchWriter;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One (day, type) bucket with counts from both stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketComparison {
    pub day: NaiveDate,
    pub event_type: String,
    pub source_count: i64,
    pub target_count: i64,
}

impl BucketComparison {
    pub fn matches(&self) -> bool {
        self.source_count == self.target_count
    }
}

/// Aggregate comparison over a window.
#[derive(Debug, Serialize)]
pub struct ReconciliationReport {
    pub buckets: Vec<BucketComparison>,
    pub source_total: i64,
    pub target_total: i64,
    pub discrepancies: usize,
}

/// Result of probing the target for one sampled source id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotCheck {
    pub id: String,
    pub found: bool,
}

/// Compares the document store and the relational store over a time window.
pub struct ReconciliationReporter {
    source: SourceStore,
    writer: BatchWriter,
}

impl ReconciliationReporter {
    pub fn new(source: SourceStore, writer: BatchWriter) -> Self {
        Self { source, writer }
    }

    /// Count events per (day, type) on both sides of the window and merge.
    pub async fn compare_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ReconciliationReport> {
        let source_buckets = self.source.count_by_day_and_type(from, to).await?;
        let target_buckets: Vec<((NaiveDate, String), i64)> = self
            .writer
            .count_by_day_and_type(from, to)
            .await?
            .into_iter()
            .map(|(day, event_type, count)| ((day, event_type), count))
            .collect();

        let buckets = merge_buckets(&source_buckets, &target_buckets);
        let source_total: i64 = buckets.iter().map(|b| b.source_count).sum();
        let target_total: i64 = buckets.iter().map(|b| b.target_count).sum();
        let discrepancies = buckets.iter().filter(|b| !b.matches()).count();

        if discrepancies == 0 {
            info!(
                "Reconciliation clean: {} buckets, {} events on both sides",
                buckets.len(),
                source_total
            );
        } else {
            warn!(
                "Reconciliation found {} mismatched buckets (source {} vs target {})",
                discrepancies, source_total, target_total
            );
        }

        Ok(ReconciliationReport {
            buckets,
            source_total,
            target_total,
            discrepancies,
        })
    }

    /// Probe the target for a random sample of source ids from the window.
    pub async fn spot_check(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sample_size: usize,
    ) -> Result<Vec<SpotCheck>> {
        let ids = self.source.sample_ids(from, to, sample_size).await?;
        let mut checks = Vec::with_capacity(ids.len());

        for id in ids {
            let found = self.writer.exists_by_id(&id).await?;
            if !found {
                // Pull the source document so the operator sees what went
                // missing, not just an opaque id.
                match self.source.get_doc(&id).await? {
                    Some(doc) => warn!(
                        "Spot check miss: {} (type={}, createdAt={}) not found in target",
                        id,
                        doc.text("type").unwrap_or_else(|| "?".into()),
                        doc.text("createdAt").unwrap_or_else(|| "?".into()),
                    ),
                    None => warn!(
                        "Spot check miss: {} absent from both stores (deleted since sampling?)",
                        id
                    ),
                }
            }
            checks.push(SpotCheck { id, found });
        }

        let misses = checks.iter().filter(|c| !c.found).count();
        info!(
            "Spot check: {} sampled, {} missing from target",
            checks.len(),
            misses
        );
        Ok(checks)
    }
}

/// Merge per-side counts into the symmetric union of buckets, sorted by
/// day then type. A bucket missing on one side counts zero there.
pub fn merge_buckets(
    source: &[((NaiveDate, String), i64)],
    target: &[((NaiveDate, String), i64)],
) -> Vec<BucketComparison> {
    let mut merged: BTreeMap<(NaiveDate, String), (i64, i64)> = BTreeMap::new();

    for ((day, event_type), count) in source {
        merged.entry((*day, event_type.clone())).or_default().0 += count;
    }
    for ((day, event_type), count) in target {
        merged.entry((*day, event_type.clone())).or_default().1 += count;
    }

    merged
        .into_iter()
        .map(|((day, event_type), (source_count, target_count))| BucketComparison {
            day,
            event_type,
            source_count,
            target_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_matching_buckets_have_no_discrepancy() {
        let source = vec![
            ((day(5), "click".to_string()), 2),
            ((day(5), "apply".to_string()), 1),
        ];
        let target = vec![
            ((day(5), "apply".to_string()), 1),
            ((day(5), "click".to_string()), 2),
        ];

        let buckets = merge_buckets(&source, &target);
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().all(|b| b.matches()));
    }

    #[test]
    fn test_one_sided_bucket_counts_zero_on_the_other() {
        let source = vec![((day(5), "click".to_string()), 3)];
        let target = vec![((day(6), "print".to_string()), 4)];

        let buckets = merge_buckets(&source, &target);
        assert_eq!(buckets.len(), 2);
        assert_eq!(
            buckets[0],
            BucketComparison {
                day: day(5),
                event_type: "click".into(),
                source_count: 3,
                target_count: 0,
            }
        );
        assert_eq!(
            buckets[1],
            BucketComparison {
                day: day(6),
                event_type: "print".into(),
                source_count: 0,
                target_count: 4,
            }
        );
        assert!(buckets.iter().all(|b| !b.matches()));
    }

    #[test]
    fn test_buckets_sorted_by_day_then_type() {
        let source = vec![
            ((day(6), "apply".to_string()), 1),
            ((day(5), "click".to_string()), 1),
            ((day(5), "apply".to_string()), 1),
        ];
        let buckets = merge_buckets(&source, &[]);
        let keys: Vec<(NaiveDate, &str)> = buckets
            .iter()
            .map(|b| (b.day, b.event_type.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![(day(5), "apply"), (day(5), "click"), (day(6), "apply")]
        );
    }
}
