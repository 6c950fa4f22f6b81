//! Idempotent batch writes into the relational store.
//!
//! Rows are inserted with literal-value multi-row INSERT statements and
//! `ON CONFLICT (id) DO NOTHING`, so any batch can be replayed after a crash
//! without creating duplicates. Rows already present simply drop out of the
//! affected count.

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::transform::{ActivityRow, ImpressionRow};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tracing::{debug, info};

/// Open a connection pool against the relational store and verify it with
/// a round trip.
pub async fn connect(config: &TargetConfig, max_conns: usize) -> Result<Pool> {
    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(config.pg_config(), NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(max_conns)
        .build()
        .map_err(|e| MigrateError::Config(format!("Failed to create pool: {}", e)))?;

    let client = pool.get().await?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to target: {}:{}/{}",
        config.host, config.port, config.database
    );
    Ok(pool)
}

/// Writer for the `activities` and `impressions` tables.
pub struct BatchWriter {
    pool: Pool,
}

impl BatchWriter {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Insert a batch of activity rows. Returns the number of rows actually
    /// written; replayed rows conflict on id and are skipped.
    pub async fn write_activities(&self, rows: &[ActivityRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let with_id: Vec<&ActivityRow> = rows.iter().filter(|r| r.id.is_some()).collect();
        let without_id: Vec<&ActivityRow> = rows.iter().filter(|r| r.id.is_none()).collect();

        let conn = self.pool.get().await?;
        let mut written = 0u64;

        if !with_id.is_empty() {
            let sql = build_activity_insert(&with_id);
            written += conn.execute(&sql, &[]).await?;
        }
        // Rows without a source id cannot be deduplicated; the target
        // generates their keys.
        if !without_id.is_empty() {
            let sql = build_anonymous_activity_insert(&without_id);
            written += conn.execute(&sql, &[]).await?;
        }

        debug!("Wrote {} of {} activity rows", written, rows.len());
        Ok(written)
    }

    /// Insert a batch of impression rows, deduplicated on id.
    pub async fn write_impressions(&self, rows: &[ImpressionRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = build_impression_insert(rows);
        let conn = self.pool.get().await?;
        let written = conn.execute(&sql, &[]).await?;

        debug!("Wrote {} of {} impression rows", written, rows.len());
        Ok(written)
    }

    /// Count activity rows per (day, type) inside a half-open window.
    pub async fn count_by_day_and_type(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(NaiveDate, String, i64)>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT date_trunc('day', created_at)::date, \"type\", COUNT(*)::bigint
                 FROM activities
                 WHERE created_at >= $1 AND created_at < $2
                 GROUP BY 1, 2",
                &[&from, &to],
            )
            .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get(0), r.get(1), r.get(2)))
            .collect())
    }

    /// Whether an activity row with this source id exists.
    pub async fn exists_by_id(&self, id: &str) -> Result<bool> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt("SELECT 1 FROM activities WHERE id = $1", &[&id])
            .await?;
        Ok(row.is_some())
    }
}

/// Escape a string for SQL literal use.
fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn text_literal(s: &str) -> String {
    format!("'{}'", escape_sql_string(s))
}

fn opt_text_literal(s: &Option<String>) -> String {
    match s {
        Some(v) => text_literal(v),
        None => "NULL".to_string(),
    }
}

fn timestamp_literal(ts: &DateTime<Utc>) -> String {
    format!(
        "'{}'::timestamptz",
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

fn opt_i64_literal(v: &Option<i64>) -> String {
    match v {
        Some(n) => n.to_string(),
        None => "NULL".to_string(),
    }
}

fn tags_literal(tags: &[String]) -> String {
    if tags.is_empty() {
        return "ARRAY[]::text[]".to_string();
    }
    let items: Vec<String> = tags.iter().map(|t| text_literal(t)).collect();
    format!("ARRAY[{}]", items.join(", "))
}

/// Comma-joined literals for the shared activity columns, id and tags excluded.
fn activity_common_fields(row: &ActivityRow) -> String {
    format!(
        "{}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}",
        text_literal(row.event_type.as_str()),
        text_literal(row.channel.as_str()),
        text_literal(row.status.as_str()),
        timestamp_literal(&row.created_at),
        opt_text_literal(&row.actor_id),
        opt_text_literal(&row.session_id),
        opt_text_literal(&row.mission_id),
        opt_text_literal(&row.mission_client_id),
        opt_text_literal(&row.organization_name),
        opt_text_literal(&row.publisher_id),
        opt_text_literal(&row.to_publisher_id),
        opt_text_literal(&row.from_publisher_id),
        opt_text_literal(&row.source_id),
        opt_text_literal(&row.tag),
        tags_literal(&row.tags),
    )
}

const ACTIVITY_COLS: &str = "\"type\", channel, status, created_at, actor_id, session_id, \
     mission_id, mission_client_id, organization_name, publisher_id, \
     to_publisher_id, from_publisher_id, source_id, tag, tags";

/// Build the INSERT for rows that carry a source id.
fn build_activity_insert(rows: &[&ActivityRow]) -> String {
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            // id is always Some here; the caller partitions rows first.
            let id = row.id.as_deref().unwrap_or_default();
            format!("({}, {})", text_literal(id), activity_common_fields(row))
        })
        .collect();

    format!(
        "INSERT INTO activities (id, {}) VALUES {} ON CONFLICT (id) DO NOTHING",
        ACTIVITY_COLS,
        value_rows.join(", ")
    )
}

/// Columns forming the natural key of an id-less row: the legacy
/// references plus type and creation time. NULL-safe comparison, since
/// most references are nullable.
const ANONYMOUS_KEY_COLS: &[&str] = &[
    "created_at",
    "actor_id",
    "session_id",
    "mission_id",
    "mission_client_id",
    "publisher_id",
    "to_publisher_id",
    "from_publisher_id",
    "source_id",
];

/// Build the INSERT for rows without a source id.
///
/// With no id to conflict on, idempotence comes from a NOT EXISTS guard
/// over the composite legacy key, so a replayed boundary batch skips rows
/// the target already holds instead of double-inserting them.
fn build_anonymous_activity_insert(rows: &[&ActivityRow]) -> String {
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| format!("({})", activity_common_fields(row)))
        .collect();

    let key_match: Vec<String> = std::iter::once("a.\"type\" = v.\"type\"".to_string())
        .chain(
            ANONYMOUS_KEY_COLS
                .iter()
                .map(|c| format!("a.{} IS NOT DISTINCT FROM v.{}", c, c)),
        )
        .collect();

    format!(
        "INSERT INTO activities ({cols}) SELECT v.* FROM (VALUES {values}) \
         AS v({cols}) WHERE NOT EXISTS (SELECT 1 FROM activities a WHERE {key})",
        cols = ACTIVITY_COLS,
        values = value_rows.join(", "),
        key = key_match.join(" AND ")
    )
}

fn build_impression_insert(rows: &[ImpressionRow]) -> String {
    let value_rows: Vec<String> = rows
        .iter()
        .map(|row| {
            format!(
                "({}, {}, {}, {}, {}, {}, {}, {}, {})",
                text_literal(&row.id),
                row.from_partner_id,
                row.to_partner_id,
                opt_i64_literal(&row.mission_id),
                opt_i64_literal(&row.campaign_id),
                opt_i64_literal(&row.widget_id),
                text_literal(row.status.as_str()),
                timestamp_literal(&row.created_at),
                opt_text_literal(&row.session_id),
            )
        })
        .collect();

    format!(
        "INSERT INTO impressions (id, from_partner_id, to_partner_id, mission_id, \
         campaign_id, widget_id, status, created_at, session_id) VALUES {} \
         ON CONFLICT (id) DO NOTHING",
        value_rows.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Channel, EventStatus, EventType};
    use chrono::TimeZone;

    fn sample_activity(id: Option<&str>) -> ActivityRow {
        ActivityRow {
            id: id.map(String::from),
            event_type: EventType::Click,
            channel: Channel::Api,
            status: EventStatus::Pending,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
            actor_id: Some("u-1".into()),
            session_id: None,
            mission_id: Some("m-1".into()),
            mission_client_id: None,
            organization_name: Some("Les Restos".into()),
            publisher_id: None,
            to_publisher_id: Some("p-2".into()),
            from_publisher_id: None,
            source_id: None,
            tag: None,
            tags: vec!["a".into(), "b".into()],
        }
    }

    #[test]
    fn test_activity_insert_is_idempotent_on_id() {
        let row = sample_activity(Some("ev-1"));
        let sql = build_activity_insert(&[&row]);
        assert!(sql.starts_with("INSERT INTO activities (id, \"type\""));
        assert!(sql.ends_with("ON CONFLICT (id) DO NOTHING"));
        assert!(sql.contains("'ev-1'"));
        assert!(sql.contains("'2024-03-05T12:00:00.000Z'::timestamptz"));
        assert!(sql.contains("ARRAY['a', 'b']"));
    }

    #[test]
    fn test_anonymous_insert_deduplicates_on_composite_key() {
        let row = sample_activity(None);
        let sql = build_anonymous_activity_insert(&[&row]);

        // No id column; idempotence comes from the NOT EXISTS guard
        // instead of an ON CONFLICT target.
        assert!(sql.starts_with("INSERT INTO activities (\"type\""));
        assert!(!sql.contains("(id,"));
        assert!(sql.contains("WHERE NOT EXISTS (SELECT 1 FROM activities a WHERE"));
        assert!(sql.contains("a.\"type\" = v.\"type\""));
        assert!(sql.contains("a.created_at IS NOT DISTINCT FROM v.created_at"));
        for col in ANONYMOUS_KEY_COLS {
            assert!(sql.contains(&format!("a.{} IS NOT DISTINCT FROM v.{}", col, col)));
        }
    }

    #[test]
    fn test_literal_escaping() {
        let mut row = sample_activity(Some("ev-1"));
        row.organization_name = Some("L'Arche".into());
        let sql = build_activity_insert(&[&row]);
        assert!(sql.contains("'L''Arche'"));
    }

    #[test]
    fn test_empty_tags_keep_array_typed() {
        let mut row = sample_activity(Some("ev-1"));
        row.tags.clear();
        let sql = build_activity_insert(&[&row]);
        assert!(sql.contains("ARRAY[]::text[]"));
    }

    #[test]
    fn test_impression_insert_shape() {
        let row = ImpressionRow {
            id: "imp-1".into(),
            from_partner_id: 3,
            to_partner_id: 7,
            mission_id: Some(42),
            campaign_id: None,
            widget_id: None,
            status: EventStatus::Pending,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
            session_id: Some("req-9".into()),
        };
        let sql = build_impression_insert(&[row]);
        assert!(sql.contains("('imp-1', 3, 7, 42, NULL, NULL, 'PENDING'"));
        assert!(sql.ends_with("ON CONFLICT (id) DO NOTHING"));
    }

    #[test]
    fn test_multi_row_batch_joins_tuples() {
        let a = sample_activity(Some("ev-1"));
        let b = sample_activity(Some("ev-2"));
        let sql = build_activity_insert(&[&a, &b]);
        assert_eq!(sql.matches("'ev-").count(), 2);
        assert_eq!(sql.matches("ON CONFLICT").count(), 1);
    }
}
