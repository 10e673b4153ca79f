//! # Dispatcher Module
//!
//! Runs a resolved [`Handler`] against a canonical request under a deadline.
//!
//! ## Request Flow
//!
//! 1. The handler is spawned on the tokio runtime with a fresh [`ResponseBuilder`](crate::adapter::ResponseBuilder)
//! 2. The dispatcher races handler completion, response commit and the deadline
//! 3. A commit or a returned value becomes the response; an error or timeout
//!    becomes the canonical error body
//!
//! ## Error Handling
//!
//! - Timeout: `504 {"error": "Request timeout", "message": ...}`
//! - Handler failure or panic: `500 {"error": "Internal Server Error", "message": ..., "stack"?: ...}`
//!   where `stack` is only present in development
//! - A failure after the handler already emitted leaves the emitted response in place
//!
//! Handlers are never cancelled. After a timeout the task keeps running until
//! it finishes on its own and its result is dropped.

mod core;

pub use core::{
    handler_fn, DispatchError, Dispatcher, FnHandler, Handler, HandlerError, DEFAULT_TIMEOUT,
};
