//! Document-to-row transformation.
//!
//! The transformer is total over structurally-valid documents: dirty
//! historical data (unknown enums, unparsable timestamps, missing fields)
//! is coerced to safe defaults instead of rejected, so a single bad record
//! can never stall a migration run. The one legitimate failure is the
//! impression variant, which refuses to produce a row when a mandatory
//! partner reference cannot be resolved.

mod types;

pub use types::*;

use crate::error::Result;
use crate::resolver::ReferenceResolver;
use crate::source::SourceEvent;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Parse a raw timestamp value to UTC, or `None` if it is unparsable.
///
/// Accepts RFC 3339 strings, naive `YYYY-MM-DD HH:MM:SS` strings (assumed
/// UTC) and integer epoch milliseconds.
pub fn parse_timestamp(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    match raw {
        Some(Value::String(s)) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        }
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Coerce a raw timestamp value to UTC.
///
/// Unparsable values fall back to the current wall clock, never to null
/// and never to epoch zero, so downstream day-bucketed aggregation is not
/// corrupted by sentinel dates. The fallback is a row value only; cursor
/// watermarks must come from [`parse_timestamp`] so a dirty record can
/// never advance a checkpoint past unprocessed history.
pub fn coerce_timestamp(raw: Option<&Value>) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(Utc::now)
}

/// Transform one source document into an activity row. Total: never fails.
pub fn transform_activity(event: &SourceEvent) -> ActivityRow {
    ActivityRow {
        id: if event.id.is_empty() {
            None
        } else {
            Some(event.id.clone())
        },
        event_type: EventType::normalize(event.text("type").as_deref()),
        channel: Channel::normalize(event.text("source").as_deref()),
        status: EventStatus::normalize(event.text("status").as_deref()),
        created_at: coerce_timestamp(event.field("createdAt")),
        actor_id: event.text("user"),
        session_id: event.text("clickId"),
        mission_id: event.text("missionId"),
        mission_client_id: event.text("missionClientId"),
        organization_name: event.text("missionOrganizationName"),
        publisher_id: event.text("publisherId"),
        to_publisher_id: event.text("toPublisherId"),
        from_publisher_id: event.text("fromPublisherId"),
        source_id: event.text("sourceId"),
        tag: event.text("tag"),
        tags: event.text_list("tags"),
    }
}

/// Transform one impression document into an enriched row.
///
/// Requires both the sending and receiving partner to resolve; a miss on
/// either returns [`ImpressionOutcome::Unresolvable`] and the caller routes
/// the source id to the failure set. Mission/campaign/widget references are
/// optional: misses are logged by the resolver and the row keeps a null.
pub async fn transform_impression(
    event: &SourceEvent,
    resolver: &mut ReferenceResolver,
) -> Result<ImpressionOutcome> {
    let from_legacy = match event.text("fromPublisherId") {
        Some(v) => v,
        None => return Ok(unresolvable(event, "fromPublisherId")),
    };
    let to_legacy = match event.text("toPublisherId") {
        Some(v) => v,
        None => return Ok(unresolvable(event, "toPublisherId")),
    };

    let from_partner_id = match resolver.resolve_partner(&from_legacy).await? {
        Some(id) => id,
        None => return Ok(unresolvable(event, "fromPublisherId")),
    };
    let to_partner_id = match resolver.resolve_partner(&to_legacy).await? {
        Some(id) => id,
        None => return Ok(unresolvable(event, "toPublisherId")),
    };

    // Mission client ids are only unique per owning partner; the receiving
    // partner is the one broadcasting the mission.
    let mission_id = match event.text("missionClientId") {
        Some(client_id) => {
            resolver
                .resolve_mission(&client_id, &to_legacy, &event.id)
                .await?
        }
        None => None,
    };

    let channel = Channel::normalize(event.text("source").as_deref());
    let source_id = event.text("sourceId");
    let (campaign_id, widget_id) = match (channel, source_id) {
        (Channel::Campaign, Some(sid)) => {
            (resolver.resolve_campaign(&sid, &event.id).await?, None)
        }
        (Channel::Widget, Some(sid)) => {
            (None, resolver.resolve_widget(&sid, &event.id).await?)
        }
        _ => (None, None),
    };

    Ok(ImpressionOutcome::Row(ImpressionRow {
        id: event.id.clone(),
        from_partner_id,
        to_partner_id,
        mission_id,
        campaign_id,
        widget_id,
        status: EventStatus::normalize(event.text("status").as_deref()),
        created_at: coerce_timestamp(event.field("createdAt")),
        session_id: event.text("requestId"),
    }))
}

fn unresolvable(event: &SourceEvent, missing: &str) -> ImpressionOutcome {
    ImpressionOutcome::Unresolvable {
        source_id: event.id.clone(),
        missing: missing.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, body: serde_json::Value) -> SourceEvent {
        SourceEvent::new(id.to_string(), body)
    }

    #[test]
    fn test_transform_is_total_on_empty_document() {
        let before = Utc::now();
        let row = transform_activity(&event("abc", json!({})));

        assert_eq!(row.id.as_deref(), Some("abc"));
        assert_eq!(row.event_type, EventType::Click);
        assert_eq!(row.channel, Channel::Api);
        assert_eq!(row.status, EventStatus::Pending);
        assert!(row.created_at >= before);
        assert_eq!(row.actor_id, None);
        assert_eq!(row.tags, Vec::<String>::new());
    }

    #[test]
    fn test_unknown_type_defaults_to_click() {
        let row = transform_activity(&event("a", json!({ "type": "unknown-type" })));
        assert_eq!(row.event_type, EventType::Click);
    }

    #[test]
    fn test_legacy_channels_normalize_to_api() {
        for channel in ["publisher", "jstag"] {
            let row = transform_activity(&event("a", json!({ "source": channel })));
            assert_eq!(row.channel, Channel::Api);
        }
    }

    #[test]
    fn test_valid_timestamp_is_preserved() {
        let row = transform_activity(&event(
            "a",
            json!({ "createdAt": "2024-03-05T12:30:00.000Z" }),
        ));
        assert_eq!(
            row.created_at,
            Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_epoch_millis_timestamp_is_accepted() {
        let row = transform_activity(&event("a", json!({ "createdAt": 1709642445000i64 })));
        assert_eq!(row.created_at.timestamp_millis(), 1709642445000);
    }

    #[test]
    fn test_parse_timestamp_is_strict() {
        assert_eq!(
            parse_timestamp(Some(&json!("2024-03-05T12:30:00Z"))),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp(Some(&json!("2024-03-05 12:30:00"))),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, 30, 0).unwrap())
        );
        assert_eq!(parse_timestamp(Some(&json!("not-a-date"))), None);
        assert_eq!(parse_timestamp(Some(&json!(null))), None);
        assert_eq!(parse_timestamp(None), None);
    }

    #[test]
    fn test_garbage_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let row = transform_activity(&event("a", json!({ "createdAt": "not-a-date" })));
        assert!(row.created_at >= before);
        assert!(row.created_at.timestamp() > 0);
    }

    #[test]
    fn test_empty_strings_become_null_references() {
        let row = transform_activity(&event(
            "a",
            json!({ "missionId": "", "publisherId": "  ", "user": "u-1" }),
        ));
        assert_eq!(row.mission_id, None);
        assert_eq!(row.publisher_id, None);
        assert_eq!(row.actor_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn test_numeric_reference_is_coerced_to_string() {
        let row = transform_activity(&event("a", json!({ "publisherId": 512 })));
        assert_eq!(row.publisher_id.as_deref(), Some("512"));
    }

    #[test]
    fn test_missing_id_allows_target_generation() {
        let row = transform_activity(&event("", json!({})));
        assert_eq!(row.id, None);
    }

    #[test]
    fn test_tags_default_to_empty_and_drop_non_strings() {
        let row = transform_activity(&event("a", json!({ "tags": ["x", 3, "y"] })));
        assert_eq!(row.tags, vec!["x".to_string(), "3".to_string(), "y".to_string()]);

        let row = transform_activity(&event("a", json!({ "tags": null })));
        assert!(row.tags.is_empty());
    }

    #[tokio::test]
    async fn test_impression_without_sender_is_unresolvable() {
        let mut resolver = ReferenceResolver::detached();
        resolver.insert_partner("to-1", 7);

        let outcome = transform_impression(
            &event("imp-1", json!({ "toPublisherId": "to-1" })),
            &mut resolver,
        )
        .await
        .unwrap();

        match outcome {
            ImpressionOutcome::Unresolvable { source_id, missing } => {
                assert_eq!(source_id, "imp-1");
                assert_eq!(missing, "fromPublisherId");
            }
            ImpressionOutcome::Row(_) => panic!("expected unresolvable"),
        }
    }

    #[tokio::test]
    async fn test_impression_with_unknown_sender_is_unresolvable() {
        let mut resolver = ReferenceResolver::detached();
        resolver.insert_partner("to-1", 7);

        let outcome = transform_impression(
            &event(
                "imp-2",
                json!({ "fromPublisherId": "ghost", "toPublisherId": "to-1" }),
            ),
            &mut resolver,
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            ImpressionOutcome::Unresolvable { ref missing, .. } if missing == "fromPublisherId"
        ));
    }

    #[tokio::test]
    async fn test_impression_resolves_both_partners_and_mission() {
        let mut resolver = ReferenceResolver::detached();
        resolver.insert_partner("from-1", 3);
        resolver.insert_partner("to-1", 7);
        resolver.insert_mission("m-42", "to-1", 99);

        let outcome = transform_impression(
            &event(
                "imp-3",
                json!({
                    "fromPublisherId": "from-1",
                    "toPublisherId": "to-1",
                    "missionClientId": "m-42",
                    "source": "widget",
                    "sourceId": "w-1",
                    "status": "VALIDATED",
                    "createdAt": "2024-06-01T00:00:00Z"
                }),
            ),
            &mut resolver,
        )
        .await
        .unwrap();

        match outcome {
            ImpressionOutcome::Row(row) => {
                assert_eq!(row.id, "imp-3");
                assert_eq!(row.from_partner_id, 3);
                assert_eq!(row.to_partner_id, 7);
                assert_eq!(row.mission_id, Some(99));
                assert_eq!(row.campaign_id, None);
                // Widget w-1 is not preloaded and the resolver is detached.
                assert_eq!(row.widget_id, None);
                assert_eq!(row.status, EventStatus::Validated);
            }
            ImpressionOutcome::Unresolvable { .. } => panic!("expected a row"),
        }
    }
}
