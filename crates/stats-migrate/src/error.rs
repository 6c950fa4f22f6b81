//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source store transport error (connection, timeout, bad body).
    #[error("Source store error: {0}")]
    Source(#[from] reqwest::Error),

    /// Source store returned a non-success HTTP response.
    #[error("Source store returned {status}: {body}")]
    SourceApi { status: u16, body: String },

    /// Target database connection or query error.
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Scroll pagination failed mid-walk. The last checkpoint is intact;
    /// a re-run resumes from it.
    #[error("Scroll error: {0}")]
    Scroll(String),

    /// Cursor checkpoint could not be persisted. Always fatal: continuing
    /// past a lost watermark risks reprocessing loops or gaps.
    #[error("Checkpoint error for job {job}: {message}")]
    Checkpoint { job: String, message: String },

    /// An export job failed as a whole.
    #[error("Export failed for job {job}: {message}")]
    Export { job: String, message: String },

    /// IO error (cursor files, config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT/SIGTERM).
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Checkpoint error for a named job.
    pub fn checkpoint(job: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Checkpoint {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Create an Export error for a named job.
    pub fn export(job: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Export {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Whether this error is worth retrying on a point lookup.
    pub fn is_transient(&self) -> bool {
        match self {
            MigrateError::Source(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            MigrateError::SourceApi { status, .. } => {
                matches!(status, 429 | 502 | 503 | 504)
            }
            _ => false,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Checkpoint { .. } => 3,
            MigrateError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let err = MigrateError::SourceApi {
            status: 503,
            body: "overloaded".into(),
        };
        assert!(err.is_transient());

        let err = MigrateError::SourceApi {
            status: 404,
            body: "not found".into(),
        };
        assert!(!err.is_transient());

        assert!(!MigrateError::Config("bad".into()).is_transient());
        assert!(!MigrateError::checkpoint("backfill", "boom").is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 2);
        assert_eq!(MigrateError::checkpoint("j", "m").exit_code(), 3);
        assert_eq!(MigrateError::Cancelled.exit_code(), 130);
        assert_eq!(MigrateError::Scroll("gone".into()).exit_code(), 1);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::export("impressions", "write failed");
        let detail = err.format_detailed();
        assert!(detail.contains("impressions"));
        assert!(detail.contains("write failed"));
    }
}
