//! SQS batch invocations, recognized by `Records[].eventSource == "aws:sqs"`.
//! A Lambda invocation carries the whole batch in one event; the
//! framework normalizes it into a single [`Request`] whose body is the JSON
//! array of records, leaving batch-item splitting to the handler.

use super::Adapter;
use crate::error::Result;
use crate::request::{Request, TriggerSource};
use serde_json::Value;

pub struct SqsAdapter;

impl Adapter for SqsAdapter {
    fn recognizes(&self, event: &Value) -> bool {
        event
            .get("Records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|r| r.get("eventSource"))
            .and_then(Value::as_str)
            == Some("aws:sqs")
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let records = event.get("Records").cloned().unwrap_or(Value::Array(vec![]));
        let mut request = Request::new("SQS", "/sqs", TriggerSource::Sqs);
        request.body = serde_json::to_vec(&records).unwrap_or_default();
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
            "Records": [
                {"eventSource": "aws:sqs", "body": "{\"orderId\":1}", "messageId": "m-1"},
                {"eventSource": "aws:sqs", "body": "{\"orderId\":2}", "messageId": "m-2"},
            ]
        })
    }

    #[test]
    fn recognizes_sqs_batch() {
        assert!(SqsAdapter.recognizes(&sample_event()));
    }

    #[test]
    fn does_not_recognize_sns_batch() {
        let event = json!({"Records": [{"EventSource": "aws:sns"}]});
        assert!(!SqsAdapter.recognizes(&event));
    }

    #[test]
    fn adapts_records_into_body() {
        let request = SqsAdapter.adapt(sample_event()).unwrap();
        let body: Value = request.body_json().unwrap();
        assert_eq!(body.as_array().unwrap().len(), 2);
    }
}
