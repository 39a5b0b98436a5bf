//! The normalized per-invocation request.

use crate::headers::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

/// The trigger family that produced a [`Request`], recognized by adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    HttpV1,
    HttpV2,
    WebSocket,
    Sqs,
    Sns,
    S3,
    EventBridge,
    Scheduled,
}

/// WebSocket-specific event classification, exposed via
/// [`Request::as_websocket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebSocketEventType {
    Connect,
    Disconnect,
    Message,
}

/// WebSocket connection context, available when `trigger_source` is
/// [`TriggerSource::WebSocket`].
#[derive(Debug, Clone)]
pub struct WebSocketContext {
    pub connection_id: String,
    pub route_key: String,
    pub event_type: WebSocketEventType,
    pub stage: String,
    pub domain_name: String,
}

impl WebSocketContext {
    /// The base URL for the API Gateway Management API for this connection's
    /// stage/domain, used by handlers that need to push messages back.
    pub fn management_api_url(&self) -> String {
        format!("https://{}/{}", self.domain_name, self.stage)
    }
}

/// One incoming invocation, normalized from whatever trigger produced it.
///
/// Immutable after an adapter builds it, except `path_params` which the
/// router fills in once a route matches.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub route_key: String,
    pub headers: HeaderMap,
    pub query: HeaderMap,
    pub path_params: HashMap<String, String>,
    pub body: Vec<u8>,
    pub raw_event: Value,
    pub trigger_source: TriggerSource,
    pub websocket: Option<WebSocketContext>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>, trigger_source: TriggerSource) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            route_key: String::new(),
            headers: HeaderMap::new(),
            query: HeaderMap::new(),
            path_params: HashMap::new(),
            body: Vec::new(),
            raw_event: Value::Null,
            trigger_source,
            websocket: None,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Case-insensitive query-parameter lookup. This is the exact same
    /// lookup path whether the underlying event carried a string→string or
    /// string→any `queryStringParameters` map — both are normalized into
    /// `query` by the adapter, closing the historical
    /// `extractStringMapField` gap where the two shapes were handled
    /// differently.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name)
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(|s| s.as_str())
    }

    pub fn body_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn body_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Returns the WebSocket view of this request, if it arrived over a
    /// WebSocket trigger.
    pub fn as_websocket(&self) -> Option<&WebSocketContext> {
        self.websocket.as_ref()
    }

    /// `X-Forwarded-For` (first entry) or `X-Real-IP`, used by the rate
    /// limiter's IP-based key dimension.
    pub fn client_ip(&self) -> Option<&str> {
        self.header("X-Forwarded-For")
            .and_then(|v| v.split(',').next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .or_else(|| self.header("X-Real-IP"))
    }
}
