//! File-backed cursor storage.
//!
//! One pretty-printed JSON file per job under a configurable directory,
//! written atomically (temp file + rename).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{CursorBackend, CursorState};
use crate::error::{MigrateError, Result};

/// Local-file cursor backend for environments without a writable target
/// database schema.
pub struct FileCursorBackend {
    dir: PathBuf,
}

impl FileCursorBackend {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, job_name: &str) -> PathBuf {
        self.dir.join(format!("{}.cursor.json", job_name))
    }
}

#[async_trait]
impl CursorBackend for FileCursorBackend {
    async fn init_schema(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    async fn get(&self, job_name: &str) -> Result<Option<CursorState>> {
        let path = self.path_for(job_name);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        let state: CursorState = serde_json::from_str(&content)?;
        Ok(Some(state))
    }

    async fn save(&self, state: &CursorState) -> Result<()> {
        let path = self.path_for(&state.job_name);
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| MigrateError::checkpoint(&state.job_name, e.to_string()))?;

        // Atomic write: temp file in the same directory, then rename.
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)
            .map_err(|e| MigrateError::checkpoint(&state.job_name, e.to_string()))?;
        std::fs::rename(&temp_path, &path)
            .map_err(|e| MigrateError::checkpoint(&state.job_name, e.to_string()))?;

        debug!(
            "Checkpointed {} at {:?} ({})",
            state.job_name,
            state.last_created_at,
            path.display()
        );
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCursorBackend::new(dir.path());
        backend.init_schema().await.unwrap();
        assert!(backend.get("backfill").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCursorBackend::new(dir.path());
        backend.init_schema().await.unwrap();

        let watermark = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let state = CursorState::at("backfill", Some(watermark));
        backend.save(&state).await.unwrap();

        let loaded = backend.get("backfill").await.unwrap().unwrap();
        assert_eq!(loaded.job_name, "backfill");
        assert_eq!(loaded.last_created_at, Some(watermark));
    }

    #[tokio::test]
    async fn test_save_overwrites_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCursorBackend::new(dir.path());
        backend.init_schema().await.unwrap();

        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        backend.save(&CursorState::at("job", Some(first))).await.unwrap();
        backend.save(&CursorState::at("job", Some(second))).await.unwrap();

        let loaded = backend.get("job").await.unwrap().unwrap();
        assert_eq!(loaded.last_created_at, Some(second));

        // Exactly one cursor file, no leftover temp file.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_cursor_file_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCursorBackend::new(dir.path());
        backend.init_schema().await.unwrap();

        backend
            .save(&CursorState::at("job", None))
            .await
            .unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("job.cursor.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["job_name"], "job");
        assert!(value["last_created_at"].is_null());
    }

    #[tokio::test]
    async fn test_jobs_do_not_share_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileCursorBackend::new(dir.path());
        backend.init_schema().await.unwrap();

        let t = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        backend.save(&CursorState::at("backfill", Some(t))).await.unwrap();

        assert!(backend.get("impressions").await.unwrap().is_none());
    }
}
