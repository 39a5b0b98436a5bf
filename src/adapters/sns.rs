//! SNS batch invocations, recognized by `Records[].EventSource == "aws:sns"`.
//! Note the capitalized `EventSource` field name — SNS's record
//! shape differs from SQS's lowercase `eventSource` by exactly that.

use super::Adapter;
use crate::error::Result;
use crate::request::{Request, TriggerSource};
use serde_json::Value;

pub struct SnsAdapter;

impl Adapter for SnsAdapter {
    fn recognizes(&self, event: &Value) -> bool {
        event
            .get("Records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|r| r.get("EventSource"))
            .and_then(Value::as_str)
            == Some("aws:sns")
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let records = event.get("Records").cloned().unwrap_or(Value::Array(vec![]));
        let mut request = Request::new("SNS", "/sns", TriggerSource::Sns);
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
                {"EventSource": "aws:sns", "Sns": {"Message": "hello"}},
            ]
        })
    }

    #[test]
    fn recognizes_sns_batch() {
        assert!(SnsAdapter.recognizes(&sample_event()));
    }

    #[test]
    fn does_not_recognize_sqs_batch() {
        let event = json!({"Records": [{"eventSource": "aws:sqs"}]});
        assert!(!SnsAdapter.recognizes(&event));
    }

    #[test]
    fn adapts_records_into_body() {
        let request = SnsAdapter.adapt(sample_event()).unwrap();
        let body: Value = request.body_json().unwrap();
        assert_eq!(body[0]["Sns"]["Message"], "hello");
    }
}
