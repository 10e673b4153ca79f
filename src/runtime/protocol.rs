//! Wire format between the server and the handler shim.
//!
//! The shim reads one JSON [`ShimPayload`] on stdin. On stdout it writes
//! ordinary handler output, one `__BINI_OP__<json>` line per response-builder
//! call as it happens, and finally one `__BINI_RESULT__<json>` line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::RuntimeError;
use crate::adapter::{CanonicalRequest, ResponseOp};
use crate::dispatcher::HandlerError;

pub const OP_PREFIX: &str = "__BINI_OP__";
pub const RESULT_PREFIX: &str = "__BINI_RESULT__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShimMode {
    /// Import the module and check its default export.
    Probe,
    /// Import the module and call its default export.
    Invoke,
}

/// Where the shim imports the handler from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModuleRef {
    /// `file://` URL carrying a `?t=` cache-busting suffix.
    File { url: String },
    /// Module text, imported through a `data:` URL.
    Inline { code: String },
}

impl ModuleRef {
    /// File reference for `path`, stamped with the current time.
    pub fn file(path: &Path) -> io::Result<Self> {
        let absolute = std::path::absolute(path)?;
        let mut url = url::Url::from_file_path(&absolute).map_err(|()| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot build a file URL for {}", absolute.display()),
            )
        })?;
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        url.set_query(Some(&format!("t={stamp}")));
        Ok(ModuleRef::File { url: url.into() })
    }

    pub fn inline(code: impl Into<String>) -> Self {
        ModuleRef::Inline { code: code.into() }
    }
}

#[derive(Debug, Serialize)]
pub struct ShimPayload<'a> {
    pub mode: ShimMode,
    pub module: &'a ModuleRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<&'a CanonicalRequest>,
}

/// Where a failed run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShimStage {
    Load,
    Export,
    Invoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShimFailure {
    pub message: String,
    #[serde(default)]
    pub stack: Option<String>,
}

/// Final report of one shim run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShimResult {
    pub ok: bool,
    #[serde(default)]
    pub stage: Option<ShimStage>,
    #[serde(default)]
    pub returned: Value,
    #[serde(default)]
    pub has_return: bool,
    #[serde(default)]
    pub error: Option<ShimFailure>,
}

impl ShimResult {
    fn failure(&self) -> ShimFailure {
        self.error.clone().unwrap_or_else(|| ShimFailure {
            message: "handler failed without an error message".to_string(),
            stack: None,
        })
    }

    /// Handler outcome in the dispatcher's terms.
    pub fn into_handler_result(self) -> Result<Option<Value>, HandlerError> {
        if self.ok {
            return Ok(self.has_return.then_some(self.returned));
        }
        let failure = self.failure();
        let err = HandlerError::new(failure.message);
        Err(match failure.stack {
            Some(stack) => err.with_stack(stack),
            None => err,
        })
    }

    pub fn error_message(&self) -> String {
        self.failure().message
    }
}

/// One protocol line from the shim.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Op(ResponseOp),
    Result(ShimResult),
}

impl Frame {
    /// `Ok(None)` for ordinary output lines.
    pub fn parse(line: &str) -> Result<Option<Frame>, RuntimeError> {
        if let Some(rest) = line.strip_prefix(OP_PREFIX) {
            return serde_json::from_str(rest)
                .map(|op| Some(Frame::Op(op)))
                .map_err(|e| RuntimeError::Protocol(format!("bad op frame: {e}")));
        }
        if let Some(rest) = line.strip_prefix(RESULT_PREFIX) {
            return serde_json::from_str(rest)
                .map(|r| Some(Frame::Result(r)))
                .map_err(|e| RuntimeError::Protocol(format!("bad result frame: {e}")));
        }
        Ok(None)
    }
}
