//! Event-source recognition and lifting into [`Request`].
//!
//! Multi-source dispatch has no single-server analogue, so this module
//! follows the crate's established "typed struct + conversion function"
//! idiom seen in `config.rs`'s figment layering and `error.rs`'s `From`
//! impls.

mod eventbridge;
mod http_v1;
mod http_v2;
mod s3;
mod sns;
mod sqs;
mod websocket;

use crate::error::{Error, Result};
use crate::headers::HeaderMap;
use crate::request::Request;
use serde_json::Value;

/// Recognizes one event-source shape and lifts it into a [`Request`].
pub trait Adapter: Send + Sync {
    fn recognizes(&self, event: &Value) -> bool;
    fn adapt(&self, event: Value) -> Result<Request>;
}

/// Ordered registry; the first adapter that recognizes the payload owns it.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn Adapter>>,
}

impl AdapterRegistry {
    /// The default registry, covering every recognized event source.
    /// Order matters only where shapes could otherwise overlap: WebSocket
    /// and HTTP v1/v2 are mutually exclusive on `requestContext` shape, so
    /// ordering among them is not load-bearing, but SQS/SNS/S3 all key off
    /// `Records[]` and are checked in the order given.
    pub fn new() -> Self {
        Self {
            adapters: vec![
                Box::new(http_v2::HttpV2Adapter),
                Box::new(http_v1::HttpV1Adapter),
                Box::new(websocket::WebSocketAdapter),
                Box::new(sqs::SqsAdapter),
                Box::new(sns::SnsAdapter),
                Box::new(s3::S3Adapter),
                Box::new(eventbridge::EventBridgeAdapter),
            ],
        }
    }

    pub fn adapt(&self, event: Value) -> Result<Request> {
        for adapter in &self.adapters {
            if adapter.recognizes(&event) {
                return adapter.adapt(event);
            }
        }
        Err(Error::UnsupportedEvent(
            "no adapter recognized this event payload".to_string(),
        ))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Extracts a string-keyed parameter map from `event[field]`, regardless of
/// whether the underlying representation is a JSON object of strings or of
/// mixed-type values (numbers, bools) — both are stringified identically.
/// This is the fix for the historical `extractStringMapField` bug (spec
/// §4.1 edge case a): the two shapes must never be handled by separate code
/// paths that could silently diverge.
pub(crate) fn extract_string_map(event: &Value, field: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(Value::Object(obj)) = event.get(field) {
        for (key, value) in obj {
            if let Some(s) = value_to_string(value) {
                map.insert(key.clone(), s);
            }
        }
    }
    map
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decodes the request body, honoring `isBase64Encoded`.
pub(crate) fn decode_body(event: &Value) -> Vec<u8> {
    use base64::Engine;
    let is_b64 = event.get("isBase64Encoded").and_then(Value::as_bool).unwrap_or(false);
    let body = event.get("body").and_then(Value::as_str).unwrap_or("");
    if is_b64 {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .unwrap_or_default()
    } else {
        body.as_bytes().to_vec()
    }
}

/// Builds a [`HeaderMap`] from a flat string-object field, preserving
/// verbatim casing.
pub(crate) fn extract_headers(event: &Value) -> HeaderMap {
    extract_string_map(event, "headers")
}
