//! API Gateway HTTP API (payload format 2.0) requests, recognized by
//! `version == "2.0"` + `requestContext.http`.

use super::{decode_body, extract_headers, extract_string_map, Adapter};
use crate::error::Result;
use crate::request::{Request, TriggerSource};
use serde_json::Value;

pub struct HttpV2Adapter;

impl Adapter for HttpV2Adapter {
    fn recognizes(&self, event: &Value) -> bool {
        event.get("version").and_then(Value::as_str) == Some("2.0")
            && event
                .get("requestContext")
                .and_then(|rc| rc.get("http"))
                .is_some()
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let http = event
            .get("requestContext")
            .and_then(|rc| rc.get("http"))
            .cloned()
            .unwrap_or(Value::Null);
        let method = http.get("method").and_then(Value::as_str).unwrap_or("GET").to_string();
        let path = http.get("path").and_then(Value::as_str).unwrap_or("/").to_string();

        let mut request = Request::new(method, path, TriggerSource::HttpV2);
        request.route_key = event
            .get("routeKey")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        request.headers = extract_headers(&event);
        request.query = extract_string_map(&event, "queryStringParameters");
        request.path_params = extract_string_map(&event, "pathParameters")
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        request.body = decode_body(&event);
        request.raw_event = event;
        Ok(request)
    }
}
