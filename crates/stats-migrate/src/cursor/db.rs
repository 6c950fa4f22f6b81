//! Database-backed cursor storage.
//!
//! One row per job in a `migration_cursors` key-value table inside the
//! target database, auto-created on first use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tracing::debug;

use super::{CursorBackend, CursorState};
use crate::error::{MigrateError, Result};

/// Durable cursor backend in the target database.
pub struct DbCursorBackend {
    pool: Pool,
}

impl DbCursorBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CursorBackend for DbCursorBackend {
    async fn init_schema(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS migration_cursors (
                job_name TEXT PRIMARY KEY,
                last_created_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            &[],
        )
        .await?;
        Ok(())
    }

    async fn get(&self, job_name: &str) -> Result<Option<CursorState>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT job_name, last_created_at, updated_at
                 FROM migration_cursors
                 WHERE job_name = $1",
                &[&job_name],
            )
            .await?;

        Ok(row.map(|r| CursorState {
            job_name: r.get(0),
            last_created_at: r.get::<_, Option<DateTime<Utc>>>(1),
            updated_at: r.get(2),
        }))
    }

    async fn save(&self, state: &CursorState) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::checkpoint(&state.job_name, e.to_string()))?;

        conn.execute(
            "INSERT INTO migration_cursors (job_name, last_created_at, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT (job_name) DO UPDATE SET
                last_created_at = EXCLUDED.last_created_at,
                updated_at = NOW()",
            &[&state.job_name, &state.last_created_at],
        )
        .await
        .map_err(|e| MigrateError::checkpoint(&state.job_name, e.to_string()))?;

        debug!(
            "Checkpointed {} at {:?}",
            state.job_name, state.last_created_at
        );
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "db"
    }
}
