//! S3 notification invocations, recognized by `Records[].eventSource ==
//! "aws:s3"`.

use super::Adapter;
use crate::error::Result;
use crate::request::{Request, TriggerSource};
use serde_json::Value;

pub struct S3Adapter;

impl Adapter for S3Adapter {
    fn recognizes(&self, event: &Value) -> bool {
        event
            .get("Records")
            .and_then(Value::as_array)
            .and_then(|records| records.first())
            .and_then(|r| r.get("eventSource"))
            .and_then(Value::as_str)
            == Some("aws:s3")
    }

    fn adapt(&self, event: Value) -> Result<Request> {
        let records = event.get("Records").cloned().unwrap_or(Value::Array(vec![]));
        let mut request = Request::new("S3", "/s3", TriggerSource::S3);
        request.body = serde_json::to_vec(&records).unwrap_or_default();
        request.raw_event = event;
        Ok(request)
    }
}
