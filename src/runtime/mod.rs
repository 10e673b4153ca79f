//! # Script Runtime Bridge
//!
//! Handler modules are JavaScript (or TypeScript) files, so they run inside an
//! external script runtime, `node` by default. The server talks to it through
//! a small embedded shim:
//!
//! 1. The runtime is started with the shim as its program and a JSON payload
//!    on stdin naming the module and, for invocations, the canonical request
//! 2. The shim imports the module, from a cache-busted `file://` URL or from
//!    transpiled text, and checks the default export is a function
//! 3. Every response-builder call is streamed back as an operation and
//!    replayed onto the Rust [`ResponseBuilder`](crate::adapter::ResponseBuilder),
//!    so an early `res.json()` commits the response while the handler keeps running
//! 4. A final result line carries the return value or the thrown error
//!
//! Any other output of the handler is logged under the `biniserve::handler`
//! target.

mod core;
mod loader;
mod protocol;

pub use core::{shim_source, RuntimeError, ScriptRuntime, HANDLER_LOG_TARGET};
pub use loader::{ScriptHandler, ScriptLoader};
pub use protocol::{Frame, ModuleRef, ShimFailure, ShimMode, ShimPayload, ShimResult, ShimStage};
