//! Source store client: an Elasticsearch-compatible document index spoken
//! to over HTTP with `reqwest`.
//!
//! The engine consumes four capabilities from the source store: an ordered
//! scroll walk ([`Scroll`]), point gets by id, bulk export-status
//! write-back ([`annotate`]), and day/type aggregations for
//! reconciliation.

mod annotate;
mod scroll;
mod types;

pub use annotate::{ExportStatus, StatusAnnotator};
pub use scroll::Scroll;
pub use types::{Hit, HitsEnvelope, SearchResponse, SourceEvent};

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Marker value the annotator writes for successfully exported records;
/// the impression scroll query excludes it.
pub const EXPORT_STATUS_SUCCESS: &str = "SUCCESS";

/// Marker value for failed exports. Failure-marked records stay eligible
/// for the next export pass.
pub const EXPORT_STATUS_FAILURE: &str = "FAILURE";

/// Client for the source document store.
#[derive(Clone)]
pub struct SourceStore {
    client: reqwest::Client,
    base_url: String,
    index: String,
    user: Option<String>,
    password: Option<String>,
    keep_alive: String,
    retry_attempts: u32,
}

impl SourceStore {
    /// Create a client from configuration and verify nothing is obviously
    /// malformed. No connection is opened until the first request.
    pub fn new(config: &SourceConfig, retry_attempts: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            user: config.user.clone(),
            password: config.password.clone(),
            keep_alive: config.scroll_keep_alive.clone(),
            retry_attempts,
        })
    }

    /// Index this client reads from.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Cheap liveness probe.
    pub async fn ping(&self) -> Result<()> {
        self.send(Method::GET, "", None).await?;
        Ok(())
    }

    /// Start an ordered scroll walk over `query`.
    pub fn scroll(&self, query: Value, batch_size: usize) -> Scroll {
        Scroll::new(self.clone(), query, batch_size)
    }

    /// Point get by document id. Retries transient failures with bounded
    /// exponential backoff; a missing document is `None`, not an error.
    pub async fn get_doc(&self, id: &str) -> Result<Option<SourceEvent>> {
        let path = format!("{}/_doc/{}", self.index, id);
        let mut attempt = 0u32;
        loop {
            match self.send(Method::GET, &path, None).await {
                Ok(body) => {
                    let found = body
                        .get("found")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    if !found {
                        return Ok(None);
                    }
                    let source = body.get("_source").cloned().unwrap_or(Value::Null);
                    return Ok(Some(SourceEvent::new(id.to_string(), source)));
                }
                Err(MigrateError::SourceApi { status: 404, .. }) => return Ok(None),
                Err(e) if attempt < self.retry_attempts && e.is_transient() => {
                    attempt += 1;
                    let delay = Duration::from_millis(200 * (1u64 << attempt));
                    warn!(
                        "Point get of {} failed ({}), retrying in {:?} (attempt {}/{})",
                        id, e, delay, attempt, self.retry_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Count events grouped by (day, type) inside `[from, to)`.
    pub async fn count_by_day_and_type(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<((NaiveDate, String), i64)>> {
        let body = json!({
            "size": 0,
            "query": window_filter(from, to),
            "aggs": {
                "days": {
                    "date_histogram": { "field": "createdAt", "calendar_interval": "day" },
                    "aggs": {
                        "types": { "terms": { "field": "type.keyword", "size": 50 } }
                    }
                }
            }
        });

        let path = format!("{}/_search", self.index);
        let resp = self.send(Method::POST, &path, Some(&body)).await?;
        parse_day_type_buckets(&resp)
    }

    /// Draw `sample_size` random document ids from the window.
    pub async fn sample_ids(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        sample_size: usize,
    ) -> Result<Vec<String>> {
        let seed: u32 = rand::random();
        let body = json!({
            "size": sample_size,
            "_source": false,
            "query": {
                "function_score": {
                    "query": window_filter(from, to),
                    "random_score": { "seed": seed, "field": "_seq_no" }
                }
            }
        });

        let path = format!("{}/_search", self.index);
        let resp = self.send(Method::POST, &path, Some(&body)).await?;
        let parsed: SearchResponse = serde_json::from_value(resp)?;
        Ok(parsed.hits.hits.into_iter().map(|h| h.id).collect())
    }

    /// Open a new scroll.
    pub(crate) async fn open_scroll(
        &self,
        query: &Value,
        batch_size: usize,
    ) -> Result<SearchResponse> {
        let body = json!({
            "size": batch_size,
            "sort": [{ "createdAt": { "order": "asc" } }],
            "query": query,
        });
        let path = format!("{}/_search?scroll={}", self.index, self.keep_alive);
        let resp = self.send(Method::POST, &path, Some(&body)).await?;
        Ok(serde_json::from_value(resp)?)
    }

    /// Fetch the next page of an open scroll, renewing the keep-alive.
    pub(crate) async fn continue_scroll(&self, scroll_id: &str) -> Result<SearchResponse> {
        let body = json!({ "scroll": self.keep_alive, "scroll_id": scroll_id });
        let resp = self.send(Method::POST, "_search/scroll", Some(&body)).await?;
        Ok(serde_json::from_value(resp)?)
    }

    /// Release a finished scroll context.
    pub(crate) async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let body = json!({ "scroll_id": scroll_id });
        self.send(Method::DELETE, "_search/scroll", Some(&body))
            .await?;
        debug!("Cleared scroll context");
        Ok(())
    }

    /// Submit an NDJSON bulk body with `refresh=false` (fire-and-forget
    /// consistency). Item-level errors are logged, not fatal.
    pub(crate) async fn bulk(&self, ndjson: String) -> Result<()> {
        let url = format!("{}/{}/_bulk?refresh=false", self.base_url, self.index);
        let mut rb = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(ndjson);
        if let Some(ref user) = self.user {
            rb = rb.basic_auth(user, self.password.as_deref());
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MigrateError::SourceApi {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        if body.get("errors").and_then(Value::as_bool).unwrap_or(false) {
            let failed = body
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| {
                            item.get("update")
                                .and_then(|u| u.get("error"))
                                .is_some()
                        })
                        .count()
                })
                .unwrap_or(0);
            warn!("Bulk status write-back reported {} item errors", failed);
        }
        Ok(())
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        };

        let mut rb = self.client.request(method, &url);
        if let Some(ref user) = self.user {
            rb = rb.basic_auth(user, self.password.as_deref());
        }
        if let Some(body) = body {
            rb = rb.json(body);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MigrateError::SourceApi {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

/// Range filter for a reconciliation window.
fn window_filter(from: DateTime<Utc>, to: DateTime<Utc>) -> Value {
    json!({
        "range": {
            "createdAt": {
                "gte": from.to_rfc3339(),
                "lt": to.to_rfc3339(),
            }
        }
    })
}

/// Query for the general backfill walk.
///
/// First run is unconstrained (full history). On resume the lower bound is
/// intentionally inclusive of the watermark: the boundary record is
/// re-offered and absorbed by conflict-skip at insert, which guarantees no
/// event is skipped across a restart.
pub fn backfill_query(resume_from: Option<DateTime<Utc>>) -> Value {
    match resume_from {
        None => json!({ "match_all": {} }),
        Some(watermark) => json!({
            "range": { "createdAt": { "gte": watermark.to_rfc3339() } }
        }),
    }
}

/// Query for the impression export walk: print events not yet marked as
/// successfully exported. Resumption comes from the status filter alone,
/// never from a time bound: failure-marked and unmarked records of any
/// age stay eligible, so re-running the export retries exactly what is
/// missing.
pub fn impression_query() -> Value {
    json!({
        "bool": {
            "must": [
                { "term": { "type.keyword": "print" } }
            ],
            "must_not": [
                { "term": { "exportStatus.keyword": EXPORT_STATUS_SUCCESS } }
            ]
        }
    })
}

/// Parse date_histogram/terms buckets into ((day, type), count) pairs.
fn parse_day_type_buckets(resp: &Value) -> Result<Vec<((NaiveDate, String), i64)>> {
    let days = resp
        .pointer("/aggregations/days/buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| MigrateError::Scroll("aggregation response missing day buckets".into()))?;

    let mut out = Vec::new();
    for day_bucket in days {
        let millis = day_bucket
            .get("key")
            .and_then(Value::as_i64)
            .ok_or_else(|| MigrateError::Scroll("day bucket missing key".into()))?;
        let day = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| MigrateError::Scroll("day bucket key out of range".into()))?
            .date_naive();

        let types = day_bucket
            .pointer("/types/buckets")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for type_bucket in &types {
            let event_type = type_bucket
                .get("key")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let count = type_bucket
                .get("doc_count")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            out.push(((day, event_type), count));
        }
    }

    info!("Source aggregation returned {} (day, type) buckets", out.len());
    Ok(out)
}
