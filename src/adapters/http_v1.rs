//! API Gateway REST API (payload format 1.0) and ALB target requests,
//! recognized by `httpMethod` + `path` + `requestContext.identity`.

use super::{decode_body, extract_headers, extract_string_map, Adapter};
use crate::error::Result;
use crate::request::{Request, TriggerSource};
use serde_json::Value;

pub struct HttpV1Adapter;

impl Adapter for HttpV1Adapter {
    fn recognizes(&self, event: &Value) -> bool {
        event.get("httpMethod").and_then(Value::as_str).is_some()
            && event.get("path").and_then(Value::as_str).is_some()
            && event
                .get("requestContext")
                .and_then(|rc| rc.get("identity"))
                .is_some()
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let method = event.get("httpMethod").and_then(Value::as_str).unwrap_or("GET").to_string();
        let path = event.get("path").and_then(Value::as_str).unwrap_or("/").to_string();

        let mut request = Request::new(method, path, TriggerSource::HttpV1);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> Value {
        json!({
            "httpMethod": "POST",
            "path": "/orders/42",
            "headers": {"Content-Type": "application/json"},
            "queryStringParameters": {"expand": "items"},
            "pathParameters": {"id": "42"},
            "body": "{\"qty\":1}",
            "isBase64Encoded": false,
            "requestContext": {"identity": {"sourceIp": "1.2.3.4"}},
        })
    }

    #[test]
    fn recognizes_rest_api_shape() {
        assert!(HttpV1Adapter.recognizes(&sample_event()));
    }

    #[test]
    fn does_not_recognize_http_v2_shape() {
        let event = json!({"version": "2.0", "requestContext": {"http": {}}});
        assert!(!HttpV1Adapter.recognizes(&event));
    }

    #[test]
    fn adapts_method_path_query_and_body() {
        let request = HttpV1Adapter.adapt(sample_event()).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/orders/42");
        assert_eq!(request.query("expand"), Some("items"));
        assert_eq!(request.path_param("id"), Some("42"));
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body_str().unwrap(), "{\"qty\":1}");
    }
}
