//! Per-record export-status write-back.
//!
//! The impression export marks every processed source record as exported
//! successfully or not, so the next pass can re-scan exactly the records
//! that are still missing, regardless of batch order or retries. The
//! general backfill never uses this: its source is time-ordered and the
//! cursor watermark plus insert-time conflict-skip already make it
//! resumable.

use super::{SourceStore, EXPORT_STATUS_FAILURE, EXPORT_STATUS_SUCCESS};
use crate::error::Result;
use serde_json::json;
use tracing::debug;

/// Two-state export outcome written back onto a source record.
///
/// Explicit so the two branches are exhaustiveness-checked wherever an
/// outcome is handled, instead of living as ad hoc string literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Success,
    Failure { reason: String },
}

impl ExportStatus {
    /// Marker value stored on the source record.
    pub fn marker(&self) -> &'static str {
        match self {
            ExportStatus::Success => EXPORT_STATUS_SUCCESS,
            ExportStatus::Failure { .. } => EXPORT_STATUS_FAILURE,
        }
    }
}

/// Writes export outcomes back to the source store in bulk, without a
/// strong-consistency refresh (`refresh=false`).
pub struct StatusAnnotator {
    store: SourceStore,
}

impl StatusAnnotator {
    pub fn new(store: SourceStore) -> Self {
        Self { store }
    }

    /// Mark records as successfully exported.
    pub async fn mark_success(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let body = build_success_body(ids);
        self.store.bulk(body).await?;
        debug!("Marked {} records as exported", ids.len());
        Ok(())
    }

    /// Mark records as failed, keeping the per-record reason for later
    /// manual backfill.
    pub async fn mark_failures(&self, failures: &[(String, String)]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let body = build_failure_body(failures);
        self.store.bulk(body).await?;
        debug!("Marked {} records as failed", failures.len());
        Ok(())
    }
}

/// NDJSON bulk body marking ids as successfully exported.
fn build_success_body(ids: &[String]) -> String {
    let mut body = String::new();
    for id in ids {
        body.push_str(&json!({ "update": { "_id": id } }).to_string());
        body.push('\n');
        body.push_str(&json!({ "doc": { "exportStatus": EXPORT_STATUS_SUCCESS } }).to_string());
        body.push('\n');
    }
    body
}

/// NDJSON bulk body marking (id, reason) pairs as failed.
fn build_failure_body(failures: &[(String, String)]) -> String {
    let mut body = String::new();
    for (id, reason) in failures {
        body.push_str(&json!({ "update": { "_id": id } }).to_string());
        body.push('\n');
        body.push_str(
            &json!({
                "doc": {
                    "exportStatus": EXPORT_STATUS_FAILURE,
                    "exportStatusReason": reason,
                }
            })
            .to_string(),
        );
        body.push('\n');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_body_shape() {
        let body = build_success_body(&["a".to_string(), "b".to_string()]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"update":{"_id":"a"}}"#);
        assert_eq!(lines[1], r#"{"doc":{"exportStatus":"SUCCESS"}}"#);
        assert_eq!(lines[2], r#"{"update":{"_id":"b"}}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_failure_body_carries_reason() {
        let body = build_failure_body(&[("x".to_string(), "missing fromPublisherId".to_string())]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(r#""exportStatus":"FAILURE""#));
        assert!(lines[1].contains("missing fromPublisherId"));
    }

    #[test]
    fn test_reason_with_quotes_is_escaped() {
        let body = build_failure_body(&[("x".to_string(), r#"bad "value""#.to_string())]);
        // Every line must stay valid JSON on its own.
        for line in body.lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }

    #[test]
    fn test_markers() {
        assert_eq!(ExportStatus::Success.marker(), "SUCCESS");
        assert_eq!(
            ExportStatus::Failure { reason: "r".into() }.marker(),
            "FAILURE"
        );
    }
}
