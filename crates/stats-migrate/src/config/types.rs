//! Configuration type definitions.

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source store configuration (document search index).
    pub source: SourceConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source store (document search index, Elasticsearch-compatible HTTP API)
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL, e.g. `https://search.internal:9200`.
    pub url: String,

    /// Index holding the activity events.
    #[serde(default = "default_index")]
    pub index: String,

    /// Basic-auth username (optional).
    #[serde(default)]
    pub user: Option<String>,

    /// Basic-auth password (optional).
    #[serde(default)]
    pub password: Option<String>,

    /// Scroll keep-alive window, renewed on every page.
    #[serde(default = "default_keep_alive")]
    pub scroll_keep_alive: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Target database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    pub password: String,
}

/// Cursor persistence backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorBackendKind {
    /// Durable key-value table in the target database (default).
    #[default]
    Db,

    /// Local JSON files, one per job.
    File,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Batch size for the general backfill walk.
    #[serde(default = "default_backfill_batch")]
    pub backfill_batch_size: usize,

    /// Batch size for the impression export walk.
    #[serde(default = "default_impression_batch")]
    pub impression_batch_size: usize,

    /// Maximum PostgreSQL connections.
    #[serde(default = "default_pg_connections")]
    pub max_pg_connections: usize,

    /// Where cursors are persisted.
    #[serde(default)]
    pub cursor_backend: CursorBackendKind,

    /// Directory for file-backed cursors.
    #[serde(default = "default_cursor_dir")]
    pub cursor_dir: String,

    /// Retry attempts for point lookups against the source store.
    #[serde(default = "default_retry_attempts")]
    pub lookup_retry_attempts: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            backfill_batch_size: default_backfill_batch(),
            impression_batch_size: default_impression_batch(),
            max_pg_connections: default_pg_connections(),
            cursor_backend: CursorBackendKind::default(),
            cursor_dir: default_cursor_dir(),
            lookup_retry_attempts: default_retry_attempts(),
        }
    }
}

// Default value functions for serde

fn default_index() -> String {
    "activities".to_string()
}

fn default_keep_alive() -> String {
    "2m".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_pg_port() -> u16 {
    5432
}

fn default_backfill_batch() -> usize {
    1_000
}

fn default_impression_batch() -> usize {
    5_000
}

fn default_pg_connections() -> usize {
    8
}

fn default_cursor_dir() -> String {
    ".cursors".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}
