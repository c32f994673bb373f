//! Flow record model
//!
//! One captured request/response exchange, as written to the capture log
//! (one JSON object per line) and streamed to live observers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Largest body prefix kept in a record
pub const MAX_BODY_CAPTURE_BYTES: usize = 512 * 1024;

/// Request half of a flow, captured when the request is first seen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Raw query string without the leading `?`
    #[serde(default)]
    pub query: String,
    #[serde(default, alias = "request_body")]
    pub body: String,
    /// Body length in bytes
    #[serde(default, alias = "request_size")]
    pub size: u64,
}

/// Response half of a flow, captured at completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapturedResponse {
    #[serde(alias = "status_code")]
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, alias = "response_body")]
    pub body: String,
    #[serde(default, alias = "response_size")]
    pub size: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

/// A single intercepted exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowRecord {
    pub id: String,
    /// Milliseconds since epoch when the request was first seen
    pub timestamp: i64,
    pub request: CapturedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<CapturedResponse>,
}

impl FlowRecord {
    /// Case-insensitive substring test across URL, request body and response body.
    ///
    /// `needle` must already be lowercase.
    pub fn matches_lowercase(&self, needle: &str) -> bool {
        if self.request.url.to_lowercase().contains(needle) {
            return true;
        }
        if self.request.body.to_lowercase().contains(needle) {
            return true;
        }
        self.response
            .as_ref()
            .map(|resp| resp.body.to_lowercase().contains(needle))
            .unwrap_or(false)
    }
}

/// Aggregate counters over the capture index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaptureStats {
    pub total: u64,
    pub methods: BTreeMap<String, u64>,
    pub status_codes: BTreeMap<u16, u64>,
}

/// Message pushed to live observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveEvent {
    NewCapture(FlowRecord),
}

/// Text form of a captured body: UTF-8 text truncated to the capture limit,
/// or a byte-count placeholder for anything that is not text.
pub fn body_to_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => truncate_on_char_boundary(text, MAX_BODY_CAPTURE_BYTES).to_string(),
        Err(err) if err.error_len().is_none() && err.valid_up_to() >= MAX_BODY_CAPTURE_BYTES => {
            // Only the tail past the limit is incomplete
            let text = std::str::from_utf8(&body[..err.valid_up_to()]).unwrap_or_default();
            truncate_on_char_boundary(text, MAX_BODY_CAPTURE_BYTES).to_string()
        }
        Err(_) => format!("[Binary data: {} bytes]", body.len()),
    }
}

fn truncate_on_char_boundary(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Collapse repeated header names into a single comma-joined value.
pub fn headers_to_map(headers: &[(String, String)]) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        map.entry(name.clone())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FlowRecord {
        FlowRecord {
            id: "f1".into(),
            timestamp: 1_700_000_000_000,
            request: CapturedRequest {
                method: "GET".into(),
                url: "http://example.com/ping".into(),
                host: "example.com".into(),
                path: "/ping".into(),
                headers: HashMap::new(),
                query: String::new(),
                body: String::new(),
                size: 0,
            },
            response: None,
        }
    }

    #[test]
    fn pending_record_omits_response_key() {
        let line = serde_json::to_string(&record()).unwrap();
        assert!(!line.contains("\"response\""));
    }

    #[test]
    fn live_event_wire_shape() {
        let value = serde_json::to_value(LiveEvent::NewCapture(record())).unwrap();
        assert_eq!(value["type"], "new_capture");
        assert_eq!(value["data"]["id"], "f1");
    }

    #[test]
    fn accepts_legacy_field_names() {
        let line = r#"{"id":"x","timestamp":1,"request":{"method":"POST","url":"http://a/b","host":"a","path":"/b","request_body":"hi"},"response":{"status_code":201,"response_body":"ok"}}"#;
        let parsed: FlowRecord = serde_json::from_str(line).unwrap();
        assert_eq!(parsed.request.body, "hi");
        let response = parsed.response.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body, "ok");
    }

    #[test]
    fn binary_body_becomes_placeholder() {
        assert_eq!(body_to_text(&[0xff, 0xfe, 0x00]), "[Binary data: 3 bytes]");
        assert_eq!(body_to_text("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn long_text_is_truncated_on_char_boundary() {
        let text = "é".repeat(MAX_BODY_CAPTURE_BYTES);
        let captured = body_to_text(text.as_bytes());
        assert!(captured.len() <= MAX_BODY_CAPTURE_BYTES);
        assert!(captured.chars().all(|c| c == 'é'));
    }

    #[test]
    fn repeated_headers_are_joined() {
        let headers = vec![
            ("Accept".to_string(), "a".to_string()),
            ("Accept".to_string(), "b".to_string()),
        ];
        assert_eq!(headers_to_map(&headers)["Accept"], "a, b");
    }

    #[test]
    fn search_covers_response_body() {
        let mut rec = record();
        rec.response = Some(CapturedResponse {
            status: 200,
            headers: HashMap::new(),
            body: "Needle in body".into(),
            size: 14,
            duration_ms: 3,
        });
        assert!(rec.matches_lowercase("needle"));
        assert!(!rec.matches_lowercase("haystack"));
    }
}
