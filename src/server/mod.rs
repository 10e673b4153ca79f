//! HTTP front end.
//!
//! [`HttpServer`] runs a hyper HTTP/1 accept loop on a Tokio listener and hands
//! every request to [`AppService`], which routes it:
//!
//! - `/api` and `/api/*` go through rate limiting, the middleware hooks, the
//!   resolver and the dispatcher;
//! - `GET /health` and `GET /metrics` are answered inline;
//! - everything else is served from the build output, when one is configured.
//!
//! All per-instance state lives in [`AppContext`].

mod context;
mod http_server;
mod response;
mod service;

pub use context::{validate_dist, AppContext, FrontDoor, DEFAULT_BODY_LIMIT};
pub use http_server::{find_open_port, shutdown_signal, HttpServer, ServerHandle};
pub use response::{api_into_hyper, static_into_hyper, POWERED_BY, POWERED_BY_HEADER};
pub use service::{health_endpoint, is_api_path, metrics_endpoint, AppService};
