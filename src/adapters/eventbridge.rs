//! EventBridge (including scheduled rules) invocations, recognized by the
//! presence of `source` + `detail-type`. A rule's periodic
//! invocation is distinguished from a regular EventBridge event by
//! `detail-type == "Scheduled Event"`, matching EventBridge's own
//! convention for its built-in scheduler source.

use super::Adapter;
use crate::error::Result;
use crate::request::{Request, TriggerSource};
use serde_json::Value;

pub struct EventBridgeAdapter;

impl Adapter for EventBridgeAdapter {
    fn recognizes(&self, event: &Value) -> bool {
        event.get("source").and_then(Value::as_str).is_some()
            && event.get("detail-type").and_then(Value::as_str).is_some()
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let detail_type = event.get("detail-type").and_then(Value::as_str).unwrap_or_default();
        let trigger_source = if detail_type == "Scheduled Event" {
            TriggerSource::Scheduled
        } else {
            TriggerSource::EventBridge
        };
        let mut request = Request::new("EVENT", format!("/{detail_type}"), trigger_source);
        request.body = event
            .get("detail")
            .map(|d| serde_json::to_vec(d).unwrap_or_default())
            .unwrap_or_default();
        request.raw_event = event;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_eventbridge_event() {
        let event = json!({"source": "my.app", "detail-type": "order.created", "detail": {}});
        assert!(EventBridgeAdapter.recognizes(&event));
    }

    #[test]
    fn does_not_recognize_http_event() {
        let event = json!({"httpMethod": "GET", "path": "/x"});
        assert!(!EventBridgeAdapter.recognizes(&event));
    }

    #[test]
    fn scheduled_rule_gets_scheduled_trigger_source() {
        let event = json!({"source": "aws.events", "detail-type": "Scheduled Event", "detail": {}});
        let request = EventBridgeAdapter.adapt(event).unwrap();
        assert_eq!(request.trigger_source, TriggerSource::Scheduled);
    }

    #[test]
    fn regular_event_gets_eventbridge_trigger_source_and_detail_as_body() {
        let event = json!({"source": "my.app", "detail-type": "order.created", "detail": {"id": 7}});
        let request = EventBridgeAdapter.adapt(event).unwrap();
        assert_eq!(request.trigger_source, TriggerSource::EventBridge);
        let body: Value = request.body_json().unwrap();
        assert_eq!(body["id"], 7);
    }
}
