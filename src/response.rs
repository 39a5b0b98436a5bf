//! The normalized per-invocation response, serialized back to the shape the
//! originating trigger expects.

use crate::headers::HeaderMap;
use serde_json::Value;

/// One outgoing invocation result.
///
/// Invariants: writing the body marks `written = true`; a second
/// write is a no-op, never a panic; headers may be set until the response is
/// finalized; when buffering is enabled the captured payload is both
/// returned to the caller and inspectable afterward (idempotency relies on
/// this).
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: HeaderMap,
    body: Value,
    written: bool,
    buffering: bool,
    captured: Option<CapturedResponse>,
}

/// A snapshot of what was written, used by the idempotency middleware to
/// store a replayable record.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Value,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderMap::new(),
            body: Value::Null,
            written: false,
            buffering: false,
            captured: None,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn json(status: u16, body: impl Into<Value>) -> Self {
        let mut resp = Self::with_status(status);
        resp.write(body);
        resp
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Replaces every current header with `headers`, used by idempotency
    /// replay to restore the header set captured alongside a cached body.
    pub fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Enables capture of the eventual write, used before invoking a
    /// handler that idempotency or observability wants to replay/log.
    pub fn enable_buffering(&mut self) {
        self.buffering = true;
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    /// Returns what was captured, if buffering was enabled and a write
    /// occurred.
    pub fn captured(&self) -> Option<&CapturedResponse> {
        self.captured.as_ref()
    }

    /// Writes the body. A second call after `written` is set is a no-op:
    /// handlers get to call this more than once without the framework
    /// panicking on their behalf.
    pub fn write(&mut self, body: impl Into<Value>) {
        if self.written {
            return;
        }
        self.body = body.into();
        self.written = true;
        if self.buffering {
            self.captured = Some(CapturedResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: self.body.clone(),
            });
        }
    }

    /// Force-overwrites the body even if already written, used by
    /// middleware (e.g. idempotency replay, error handling) that must
    /// produce the terminal response regardless of what the handler did.
    pub fn overwrite(&mut self, status: u16, body: impl Into<Value>) {
        self.status = status;
        self.body = body.into();
        self.written = true;
        if self.buffering {
            self.captured = Some(CapturedResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: self.body.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_write_is_a_no_op() {
        let mut resp = Response::new();
        resp.write(serde_json::json!({"a": 1}));
        resp.write(serde_json::json!({"a": 2}));
        assert_eq!(resp.body(), &serde_json::json!({"a": 1}));
    }

    #[test]
    fn buffering_captures_status_headers_and_body() {
        let mut resp = Response::with_status(201);
        resp.enable_buffering();
        resp.set_header("X-Foo", "bar");
        resp.write(serde_json::json!({"ok": true}));

        let captured = resp.captured().unwrap();
        assert_eq!(captured.status, 201);
        assert_eq!(captured.headers.get("X-Foo"), Some("bar"));
        assert_eq!(captured.body, serde_json::json!({"ok": true}));
    }

    #[test]
    fn no_capture_without_buffering_enabled() {
        let mut resp = Response::new();
        resp.write(serde_json::json!("x"));
        assert!(resp.captured().is_none());
    }
}
