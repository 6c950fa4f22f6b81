//! Configuration validation.

use super::types::{Config, CursorBackendKind};
use crate::error::{MigrateError, Result};

/// Maximum page size the source store will serve per scroll request.
const MAX_SCROLL_PAGE: usize = 10_000;

/// Validate the configuration, returning the first problem found.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.url.trim().is_empty() {
        return Err(invalid("source.url must not be empty"));
    }
    if !config.source.url.starts_with("http://") && !config.source.url.starts_with("https://") {
        return Err(invalid("source.url must be an http(s) URL"));
    }
    if config.source.index.trim().is_empty() {
        return Err(invalid("source.index must not be empty"));
    }
    if config.target.host.trim().is_empty() {
        return Err(invalid("target.host must not be empty"));
    }
    if config.target.database.trim().is_empty() {
        return Err(invalid("target.database must not be empty"));
    }

    let m = &config.migration;
    if m.backfill_batch_size == 0 || m.backfill_batch_size > MAX_SCROLL_PAGE {
        return Err(invalid(format!(
            "migration.backfill_batch_size must be in 1..={}",
            MAX_SCROLL_PAGE
        )));
    }
    if m.impression_batch_size == 0 || m.impression_batch_size > MAX_SCROLL_PAGE {
        return Err(invalid(format!(
            "migration.impression_batch_size must be in 1..={}",
            MAX_SCROLL_PAGE
        )));
    }
    if m.max_pg_connections == 0 {
        return Err(invalid("migration.max_pg_connections must be at least 1"));
    }
    if m.cursor_backend == CursorBackendKind::File && m.cursor_dir.trim().is_empty() {
        return Err(invalid(
            "migration.cursor_dir must be set when cursor_backend = file",
        ));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> MigrateError {
    MigrateError::Config(message.into())
}
