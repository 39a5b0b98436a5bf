//! API Gateway WebSocket requests, recognized by `requestContext.connectionId`
//! plus `requestContext.eventType` in {CONNECT, DISCONNECT, MESSAGE}.
//!
//! `$connect` carries `queryStringParameters` the same way REST API events
//! do, but some SDK event models type it as a string→string map while
//! others (seen on `$default`/`MESSAGE` routes) type the same field as
//! string→any — both are run through [`super::extract_string_map`] so the
//! two shapes can never silently diverge.

use super::{decode_body, extract_headers, extract_string_map, Adapter};
use crate::error::Result;
use crate::request::{Request, TriggerSource, WebSocketContext, WebSocketEventType};
use serde_json::Value;

pub struct WebSocketAdapter;

impl Adapter for WebSocketAdapter {
    fn recognizes(&self, event: &Value) -> bool {
        let Some(rc) = event.get("requestContext") else { return false };
        let has_connection_id = rc.get("connectionId").and_then(Value::as_str).is_some();
        let event_type_recognized = matches!(
            rc.get("eventType").and_then(Value::as_str),
            Some("CONNECT") | Some("DISCONNECT") | Some("MESSAGE")
        );
        has_connection_id && event_type_recognized
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let rc = event.get("requestContext").cloned().unwrap_or(Value::Null);
        let connection_id = rc.get("connectionId").and_then(Value::as_str).unwrap_or_default().to_string();
        let route_key = rc
            .get("routeKey")
            .and_then(Value::as_str)
            .or_else(|| event.get("routeKey").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let event_type = match rc.get("eventType").and_then(Value::as_str) {
            Some("CONNECT") => WebSocketEventType::Connect,
            Some("DISCONNECT") => WebSocketEventType::Disconnect,
            _ => WebSocketEventType::Message,
        };
        let stage = rc.get("stage").and_then(Value::as_str).unwrap_or_default().to_string();
        let domain_name = rc.get("domainName").and_then(Value::as_str).unwrap_or_default().to_string();

        let mut request = Request::new("WEBSOCKET", route_key.clone(), TriggerSource::WebSocket);
        request.route_key = route_key;
        request.headers = extract_headers(&event);
        request.query = extract_string_map(&event, "queryStringParameters");
        request.body = decode_body(&event);
        request.websocket = Some(WebSocketContext {
            connection_id,
            route_key: request.route_key.clone(),
            event_type,
            stage,
            domain_name,
        });
        request.raw_event = event;
        Ok(request)
    }
}
