//! Canonical response builder and the response value it produces.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

/// Number of headers kept inline before the list spills to the heap.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Header list with case-insensitive, last-write-wins semantics applied by [`set_header`].
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Replace any header called `name` (ignoring case) with `value`.
pub fn set_header(headers: &mut HeaderVec, name: &str, value: String) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((Arc::from(name), value));
}

pub fn get_header<'a>(headers: &'a HeaderVec, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Final response produced by a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: String::new(),
        }
    }

    /// JSON response with the given status.
    pub fn json(status: u16, body: &Value) -> Self {
        let mut response = Self::new(status);
        response.set_header("Content-Type", CONTENT_TYPE_JSON.to_string());
        response.body = body.to_string();
        response
    }

    /// Error response in the canonical error shape.
    pub fn error(status: u16, body: ErrorBody) -> Self {
        let value = serde_json::to_value(&body).unwrap_or(Value::Null);
        Self::json(status, &value)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        get_header(&self.headers, name)
    }

    pub fn set_header(&mut self, name: &str, value: String) {
        set_header(&mut self.headers, name, value);
    }

    /// Parse the body as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Canonical error body: `{error, message?, path?, stack?, availableExtensions?}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(rename = "availableExtensions", skip_serializing_if = "Option::is_none")]
    pub available_extensions: Option<Vec<String>>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_stack(mut self, stack: Option<String>) -> Self {
        self.stack = stack;
        self
    }

    pub fn with_available_extensions(mut self, extensions: Vec<String>) -> Self {
        self.available_extensions = Some(extensions);
        self
    }
}

/// One response-builder call, as recorded by an out-of-process handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ResponseOp {
    Status {
        code: u16,
    },
    SetHeader {
        name: String,
        value: String,
    },
    Json {
        #[serde(default)]
        body: Value,
    },
    Send {
        #[serde(default)]
        body: Option<Value>,
    },
    End {
        #[serde(default)]
        body: Option<Value>,
    },
}

impl ResponseOp {
    /// Replay this call onto `res`.
    pub fn apply(&self, res: &ResponseBuilder) {
        match self {
            ResponseOp::Status { code } => {
                res.status(*code);
            }
            ResponseOp::SetHeader { name, value } => {
                res.set_header(name, value);
            }
            ResponseOp::Json { body } => res.json(body),
            ResponseOp::Send { body } => match body {
                Some(body) => res.send(body),
                None => res.end(None),
            },
            ResponseOp::End { body } => res.end(body.as_ref()),
        }
    }
}

#[derive(Debug)]
struct ResponseState {
    status: u16,
    headers: HeaderVec,
    body: Option<String>,
    sent: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ResponseState>,
    committed: Notify,
}

/// Response builder handed to handlers.
///
/// Cloning yields another handle to the same response. The first body-emitting
/// call (`json`, `send`, `end`) commits the response; every later call,
/// including `status` and `set_header`, is ignored.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    shared: Arc<Shared>,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ResponseState {
                    status: 200,
                    headers: HeaderVec::new(),
                    body: None,
                    sent: false,
                }),
                committed: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, code: u16) -> &Self {
        let mut state = self.lock();
        if state.sent {
            debug!(code, "status() after response was sent; ignored");
        } else {
            state.status = code;
        }
        self
    }

    pub fn set_header(&self, name: &str, value: &str) -> &Self {
        let mut state = self.lock();
        if state.sent {
            debug!(name, "set_header() after response was sent; ignored");
        } else {
            set_header(&mut state.headers, name, value.to_string());
        }
        self
    }

    /// Serialize `body` as JSON and commit.
    pub fn json(&self, body: &Value) {
        self.commit(Some(body.to_string()), Some(CONTENT_TYPE_JSON), true);
    }

    /// Commit with `body`: objects and arrays as JSON, strings verbatim,
    /// other scalars in their textual form.
    pub fn send(&self, body: &Value) {
        match body {
            Value::Object(_) | Value::Array(_) => {
                self.commit(Some(body.to_string()), Some(CONTENT_TYPE_JSON), true)
            }
            Value::String(s) => self.commit(Some(s.clone()), Some(CONTENT_TYPE_TEXT), false),
            Value::Null => self.commit(None, None, false),
            other => self.commit(Some(other.to_string()), Some(CONTENT_TYPE_TEXT), false),
        }
    }

    /// Commit with an optional raw body.
    pub fn end(&self, body: Option<&Value>) {
        let body = body.and_then(|b| match b {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });
        self.commit(body, None, false);
    }

    /// `force_type` replaces an existing content type; otherwise `content_type`
    /// is only a default.
    fn commit(&self, body: Option<String>, content_type: Option<&str>, force_type: bool) {
        let mut state = self.lock();
        if state.sent {
            debug!("response already sent; later emit ignored");
            return;
        }
        if let Some(ct) = content_type {
            if force_type || get_header(&state.headers, "content-type").is_none() {
                set_header(&mut state.headers, "Content-Type", ct.to_string());
            }
        }
        state.body = body;
        state.sent = true;
        drop(state);
        self.shared.committed.notify_one();
    }

    pub fn is_sent(&self) -> bool {
        self.lock().sent
    }

    /// Resolves once the response has been committed.
    ///
    /// Meant for a single waiter, the dispatcher.
    pub async fn committed(&self) {
        loop {
            if self.is_sent() {
                return;
            }
            self.shared.committed.notified().await;
        }
    }

    /// Current state as a response value.
    pub fn snapshot(&self) -> ApiResponse {
        let state = self.lock();
        ApiResponse {
            status: state.status,
            headers: state.headers.clone(),
            body: state.body.clone().unwrap_or_default(),
        }
    }

    /// Build the final response. An explicit emit wins over `returned`; a
    /// returned value is serialized as JSON with the current status; with
    /// neither the response carries the current status and an empty body.
    pub fn finish(&self, returned: Option<Value>) -> ApiResponse {
        if !self.is_sent() {
            if let Some(value) = returned {
                self.json(&value);
            }
        }
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_and_json_chain() {
        let res = ResponseBuilder::new();
        res.status(201).set_header("X-Trace", "abc").json(&json!({"ok": true}));
        let out = res.snapshot();
        assert_eq!(out.status, 201);
        assert_eq!(out.header("x-trace"), Some("abc"));
        assert_eq!(out.header("content-type"), Some(CONTENT_TYPE_JSON));
        assert_eq!(out.json_body(), Some(json!({"ok": true})));
    }

    #[test]
    fn test_set_header_is_case_insensitive_last_wins() {
        let res = ResponseBuilder::new();
        res.set_header("X-Mode", "a").set_header("x-mode", "b");
        let out = res.finish(None);
        assert_eq!(out.headers.len(), 1);
        assert_eq!(out.header("X-MODE"), Some("b"));
    }

    #[test]
    fn test_send_string_is_verbatim() {
        let res = ResponseBuilder::new();
        res.send(&json!("hello"));
        let out = res.snapshot();
        assert_eq!(out.body, "hello");
        assert_eq!(out.header("content-type"), Some(CONTENT_TYPE_TEXT));
    }

    #[test]
    fn test_send_keeps_explicit_content_type_for_strings() {
        let res = ResponseBuilder::new();
        res.set_header("Content-Type", "text/html");
        res.send(&json!("<p>hi</p>"));
        assert_eq!(res.snapshot().header("content-type"), Some("text/html"));
    }

    #[test]
    fn test_send_object_serializes_json() {
        let res = ResponseBuilder::new();
        res.send(&json!([1, 2]));
        assert_eq!(res.snapshot().body, "[1,2]");
    }

    #[test]
    fn test_first_commit_wins() {
        let res = ResponseBuilder::new();
        res.json(&json!({"first": 1}));
        res.status(500).json(&json!({"second": 2}));
        res.end(Some(&json!("third")));
        let out = res.snapshot();
        assert_eq!(out.status, 200);
        assert_eq!(out.json_body(), Some(json!({"first": 1})));
    }

    #[test]
    fn test_explicit_emit_beats_return_value() {
        let res = ResponseBuilder::new();
        res.json(&json!({"from": "emit"}));
        let out = res.finish(Some(json!({"from": "return"})));
        assert_eq!(out.json_body(), Some(json!({"from": "emit"})));
    }

    #[test]
    fn test_return_value_uses_current_status() {
        let res = ResponseBuilder::new();
        res.status(202);
        let out = res.finish(Some(json!({"queued": true})));
        assert_eq!(out.status, 202);
        assert_eq!(out.json_body(), Some(json!({"queued": true})));
    }

    #[test]
    fn test_no_emit_no_return_yields_empty_body() {
        let res = ResponseBuilder::new();
        res.status(204);
        let out = res.finish(None);
        assert_eq!(out.status, 204);
        assert!(out.body.is_empty());
    }

    #[test]
    fn test_replayed_ops_follow_builder_rules() {
        let ops: Vec<ResponseOp> = serde_json::from_value(json!([
            {"op": "status", "code": 418},
            {"op": "setHeader", "name": "X-Tea", "value": "earl grey"},
            {"op": "send", "body": "short and stout"},
            {"op": "json", "body": {"ignored": true}}
        ]))
        .unwrap();
        let res = ResponseBuilder::new();
        for op in &ops {
            op.apply(&res);
        }
        let out = res.snapshot();
        assert_eq!(out.status, 418);
        assert_eq!(out.header("x-tea"), Some("earl grey"));
        assert_eq!(out.body, "short and stout");
    }

    #[test]
    fn test_error_body_skips_absent_fields() {
        let out = ApiResponse::error(404, ErrorBody::new("API route not found").with_path("/api/x"));
        assert_eq!(
            out.json_body(),
            Some(json!({"error": "API route not found", "path": "/api/x"}))
        );
    }

    #[tokio::test]
    async fn test_committed_resolves_after_emit() {
        let res = ResponseBuilder::new();
        let handle = res.clone();
        let waiter = tokio::spawn(async move { handle.committed().await });
        res.end(None);
        waiter.await.unwrap();
        assert!(res.is_sent());
    }
}
