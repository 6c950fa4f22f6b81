//! # stats-migrate
//!
//! Migration and consistency engine moving volunteer activity events out of
//! a document store into a relational store. Supports:
//!
//! - **Historical backfill** of every event into a flat activities table
//! - **Resumable impression export** enriched with resolved foreign keys
//! - **Checkpointed scrolling** so interrupted runs resume, not restart
//! - **Idempotent writes** via conflict-skipping inserts
//! - **Reconciliation** comparing per-day counts across both stores
//!
//! ## Example
//!
//! ```rust,no_run
//! use stats_migrate::{cursor, writer, BackfillJob, BatchWriter, Config, SourceStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> stats_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let source = SourceStore::new(&config.source, config.migration.lookup_retry_attempts)?;
//!     let pool = writer::connect(&config.target, config.migration.max_pg_connections).await?;
//!     let cursor = cursor::create_backend(&config.migration, &pool).await?;
//!     let job = BackfillJob::new(
//!         source,
//!         BatchWriter::new(pool),
//!         cursor,
//!         config.migration.backfill_batch_size,
//!     );
//!     let report = job.run(CancellationToken::new()).await?;
//!     println!("Wrote {} rows", report.rows_written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod pipeline;
pub mod reconcile;
pub mod resolver;
pub mod source;
pub mod transform;
pub mod writer;

// Re-exports for convenient access
pub use config::{Config, CursorBackendKind, MigrationConfig, SourceConfig, TargetConfig};
pub use cursor::{create_backend, CursorBackend, CursorState};
pub use error::{MigrateError, Result};
pub use pipeline::{BackfillJob, BackfillReport, ImpressionExportJob, ImpressionReport};
pub use reconcile::{ReconciliationReport, ReconciliationReporter, SpotCheck};
pub use resolver::ReferenceResolver;
pub use source::{ExportStatus, SourceStore, StatusAnnotator};
pub use transform::{transform_activity, transform_impression, ActivityRow, ImpressionRow};
pub use writer::BatchWriter;
