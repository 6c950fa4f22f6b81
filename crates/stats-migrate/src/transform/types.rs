//! Enumerated event attributes and target row shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Business event type.
///
/// Historical documents carry arbitrary strings here; anything outside the
/// allowed set normalizes to [`EventType::Click`] so the migration never
/// stalls on dirty data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Print,
    #[default]
    Click,
    Apply,
    Account,
}

impl EventType {
    /// Normalize a raw value, falling back to the click default.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("print") => EventType::Print,
            Some("click") => EventType::Click,
            Some("apply") => EventType::Apply,
            Some("account") => EventType::Account,
            _ => EventType::Click,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Print => "print",
            EventType::Click => "click",
            EventType::Apply => "apply",
            EventType::Account => "account",
        }
    }
}

/// Traffic channel the event arrived through.
///
/// `jstag` and `publisher` are legacy channel markers that collapsed into
/// the API channel when the relational model was introduced; they normalize
/// to [`Channel::Api`] along with every unknown value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Api,
    Widget,
    Campaign,
    Seo,
}

impl Channel {
    /// Normalize a raw value, falling back to the api default.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("widget") => Channel::Widget,
            Some("campaign") => Channel::Campaign,
            Some("seo") => Channel::Seo,
            _ => Channel::Api,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Api => "api",
            Channel::Widget => "widget",
            Channel::Campaign => "campaign",
            Channel::Seo => "seo",
        }
    }
}

/// Moderation status of the underlying mission application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Pending,
    Validated,
    Cancelled,
    Refused,
    CarriedOut,
}

impl EventStatus {
    /// Normalize a raw value, falling back to the pending default.
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("VALIDATED") => EventStatus::Validated,
            Some("CANCELLED") | Some("CANCELED") => EventStatus::Cancelled,
            Some("REFUSED") => EventStatus::Refused,
            Some("CARRIED_OUT") => EventStatus::CarriedOut,
            _ => EventStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "PENDING",
            EventStatus::Validated => "VALIDATED",
            EventStatus::Cancelled => "CANCELLED",
            EventStatus::Refused => "REFUSED",
            EventStatus::CarriedOut => "CARRIED_OUT",
        }
    }
}

/// Relational row for the general backfill (`activities` table).
///
/// The natural key is the source document id. Some legacy event shapes
/// never carried one; those rows insert without an id and let the target
/// generate it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRow {
    pub id: Option<String>,
    pub event_type: EventType,
    pub channel: Channel,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub session_id: Option<String>,
    pub mission_id: Option<String>,
    pub mission_client_id: Option<String>,
    pub organization_name: Option<String>,
    pub publisher_id: Option<String>,
    pub to_publisher_id: Option<String>,
    pub from_publisher_id: Option<String>,
    pub source_id: Option<String>,
    pub tag: Option<String>,
    pub tags: Vec<String>,
}

/// Enriched relational row for the impression export (`impressions` table).
///
/// Both partner foreign keys are mandatory: an impression without its
/// sending and receiving partner is meaningless for reporting, which is
/// why this is the one transform that can fail.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpressionRow {
    pub id: String,
    pub from_partner_id: i64,
    pub to_partner_id: i64,
    pub mission_id: Option<i64>,
    pub campaign_id: Option<i64>,
    pub widget_id: Option<i64>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub session_id: Option<String>,
}

/// Outcome of the impression transform.
#[derive(Debug, Clone)]
pub enum ImpressionOutcome {
    /// Both partners resolved; the row is ready to write.
    Row(ImpressionRow),

    /// A mandatory reference could not be resolved. The caller routes the
    /// source id to the failure set; the record stays eligible for the
    /// next export pass.
    Unresolvable { source_id: String, missing: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_defaults_to_click() {
        assert_eq!(EventType::normalize(Some("unknown-type")), EventType::Click);
        assert_eq!(EventType::normalize(None), EventType::Click);
        assert_eq!(EventType::normalize(Some("")), EventType::Click);
    }

    #[test]
    fn test_event_type_known_values() {
        assert_eq!(EventType::normalize(Some("print")), EventType::Print);
        assert_eq!(EventType::normalize(Some("Apply")), EventType::Apply);
        assert_eq!(EventType::normalize(Some(" account ")), EventType::Account);
    }

    #[test]
    fn test_channel_legacy_markers_normalize_to_api() {
        assert_eq!(Channel::normalize(Some("publisher")), Channel::Api);
        assert_eq!(Channel::normalize(Some("jstag")), Channel::Api);
        assert_eq!(Channel::normalize(Some("something-else")), Channel::Api);
        assert_eq!(Channel::normalize(None), Channel::Api);
    }

    #[test]
    fn test_channel_known_values() {
        assert_eq!(Channel::normalize(Some("widget")), Channel::Widget);
        assert_eq!(Channel::normalize(Some("CAMPAIGN")), Channel::Campaign);
        assert_eq!(Channel::normalize(Some("seo")), Channel::Seo);
    }

    #[test]
    fn test_status_defaults_to_pending() {
        assert_eq!(EventStatus::normalize(Some("nonsense")), EventStatus::Pending);
        assert_eq!(EventStatus::normalize(None), EventStatus::Pending);
    }

    #[test]
    fn test_status_accepts_both_cancelled_spellings() {
        assert_eq!(
            EventStatus::normalize(Some("CANCELED")),
            EventStatus::Cancelled
        );
        assert_eq!(
            EventStatus::normalize(Some("cancelled")),
            EventStatus::Cancelled
        );
    }
}
