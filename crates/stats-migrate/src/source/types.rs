//! Wire types for the document search index.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One raw event document from the source index.
///
/// The body is kept as loose JSON: historical documents are dirty and the
/// transformer owns all coercion. Accessors below are lenient by design.
#[derive(Debug, Clone)]
pub struct SourceEvent {
    /// Opaque source id (the index `_id`). Empty for legacy shapes that
    /// never carried one.
    pub id: String,

    body: Map<String, Value>,
}

impl SourceEvent {
    /// Wrap a raw document body. Non-object bodies collapse to empty.
    pub fn new(id: String, body: Value) -> Self {
        let body = match body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { id, body }
    }

    /// Raw field access.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.body.get(key)
    }

    /// Text field access: strings pass through, numbers are stringified,
    /// blank strings count as absent.
    pub fn text(&self, key: &str) -> Option<String> {
        match self.body.get(key)? {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// List-of-text access: non-arrays and non-text elements are dropped,
    /// absent lists come back empty rather than null.
    pub fn text_list(&self, key: &str) -> Vec<String> {
        match self.body.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Search/scroll response envelope.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id")]
    pub scroll_id: Option<String>,

    #[serde(default)]
    pub hits: HitsEnvelope,
}

#[derive(Debug, Default, Deserialize)]
pub struct HitsEnvelope {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl Hit {
    pub fn into_event(self) -> SourceEvent {
        SourceEvent::new(self.id, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_trims_and_drops_blank() {
        let ev = SourceEvent::new("1".into(), json!({ "a": " x ", "b": "   ", "c": 12 }));
        assert_eq!(ev.text("a").as_deref(), Some("x"));
        assert_eq!(ev.text("b"), None);
        assert_eq!(ev.text("c").as_deref(), Some("12"));
        assert_eq!(ev.text("missing"), None);
    }

    #[test]
    fn test_non_object_body_collapses_to_empty() {
        let ev = SourceEvent::new("1".into(), json!(["not", "an", "object"]));
        assert_eq!(ev.text("anything"), None);
    }

    #[test]
    fn test_search_response_without_scroll_id_parses() {
        let resp: SearchResponse = serde_json::from_value(json!({
            "hits": { "hits": [{ "_id": "e1", "_source": { "type": "click" } }] }
        }))
        .unwrap();
        assert!(resp.scroll_id.is_none());
        assert_eq!(resp.hits.hits.len(), 1);
        let ev = resp.hits.hits.into_iter().next().unwrap().into_event();
        assert_eq!(ev.id, "e1");
        assert_eq!(ev.text("type").as_deref(), Some("click"));
    }
}
