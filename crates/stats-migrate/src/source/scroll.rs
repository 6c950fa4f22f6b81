//! Ordered scroll walk over the source index.

use super::{SourceEvent, SourceStore};
use crate::error::{MigrateError, Result};
use serde_json::Value;
use tracing::{debug, warn};

/// A long-lived, finite walk over the source store in ascending
/// creation-time order.
///
/// The walk is lazy (one page in flight at a time) and not restartable
/// mid-stream: a read error aborts the current run and the caller resumes
/// from its last checkpoint on the next invocation. The server-side scroll
/// context is renewed on every page and released when the walk drains; an
/// abandoned context simply expires with its keep-alive.
pub struct Scroll {
    store: SourceStore,
    query: Value,
    batch_size: usize,
    scroll_id: Option<String>,
    started: bool,
    finished: bool,
    batches: u64,
}

impl Scroll {
    pub(crate) fn new(store: SourceStore, query: Value, batch_size: usize) -> Self {
        Self {
            store,
            query,
            batch_size,
            scroll_id: None,
            started: false,
            finished: false,
            batches: 0,
        }
    }

    /// Fetch the next batch, or `None` once the walk has drained.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<SourceEvent>>> {
        if self.finished {
            return Ok(None);
        }

        let resp = if !self.started {
            self.started = true;
            self.store.open_scroll(&self.query, self.batch_size).await?
        } else {
            let scroll_id = self.scroll_id.clone().ok_or_else(|| {
                MigrateError::Scroll("scroll context lost between pages".into())
            })?;
            self.store.continue_scroll(&scroll_id).await?
        };

        if let Some(id) = resp.scroll_id {
            self.scroll_id = Some(id);
        }

        if resp.hits.hits.is_empty() {
            self.finished = true;
            if let Some(ref id) = self.scroll_id {
                // Best effort: the context expires on its own if this fails.
                if let Err(e) = self.store.clear_scroll(id).await {
                    warn!("Failed to clear scroll context: {}", e);
                }
            }
            debug!("Scroll drained after {} batches", self.batches);
            return Ok(None);
        }

        self.batches += 1;
        let events = resp
            .hits
            .hits
            .into_iter()
            .map(|hit| hit.into_event())
            .collect();
        Ok(Some(events))
    }
}
