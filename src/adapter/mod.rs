//! # Request/Response Adapter
//!
//! Handlers are written once against a single request shape and a single
//! response builder. This module converts the request shapes the engine meets
//! in the wild into that canonical form:
//!
//! | Shape | Source | Malformed JSON |
//! |-------|--------|----------------|
//! | [`StreamRequest`] | raw connection (development server) | rejected, 400 |
//! | [`FrameworkRequest`] | body pre-parsed by the production front door | rejected upstream |
//! | [`PlatformEvent`] | serverless event object | `{}` |
//! | [`FetchRequest`] | Fetch-style edge request | `{}` |
//!
//! The [`ResponseBuilder`] records `status`/`set_header`/`json`/`send`/`end`
//! calls. The first body-emitting call commits the response and every later
//! call is ignored.

mod request;
mod response;

pub use request::{
    adapt, client_ip, header_map, is_json_content_type, parse_body, parse_query, AdapterError,
    AdapterOptions, BodyPolicy, CanonicalRequest, FetchRequest, FrameworkRequest, NativeRequest,
    PlatformEvent, StreamRequest, BODY_METHODS, UNKNOWN_CLIENT,
};
pub use response::{
    get_header, set_header, ApiResponse, ErrorBody, HeaderVec, ResponseBuilder, ResponseOp,
    CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, MAX_INLINE_HEADERS,
};
