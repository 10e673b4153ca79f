//! # biniserve
//!
//! **biniserve** is the API dispatch engine behind Bini.js projects: every file
//! under `src/app/api` is an HTTP endpoint at `/api/<route>`, served in
//! development and production by the same Rust core and packaged for
//! serverless platforms by the emitters.
//!
//! ## Architecture
//!
//! - **[`route`]** - Route names and the handler file extension priority
//! - **[`resolver`]** - Finds, loads and caches handler modules
//! - **[`adapter`]** - Normalizes native requests; records response operations
//! - **[`dispatcher`]** - Runs a handler under a deadline and maps its outcome
//! - **[`rate_limit`]** - Per-client sliding-window admission
//! - **[`runtime`]** - Bridge to the script runtime that executes handlers
//! - **[`transpile`]** - TypeScript type stripping and default-export rebinding
//! - **[`server`]** - hyper front doors, `/health` and `/metrics`
//! - **[`middleware`]** - Metrics, CORS and memory figures
//! - **[`static_files`]** - Build output serving with SPA fallback
//! - **[`hot_reload`]** - Cache invalidation on API file changes
//! - **[`emit`]** - Vercel, Netlify, Cloudflare and per-verb function output
//! - **[`config`]**, **[`logging`]**, **[`ids`]**, **[`cli`]** - The ambient stack
//!
//! ### Request Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Server as server::AppService
//!     participant Limiter as rate_limit::RateLimiter
//!     participant Resolver as resolver::Resolver
//!     participant Adapter as adapter::adapt
//!     participant Dispatcher as dispatcher::Dispatcher
//!     participant Runtime as runtime::ScriptRuntime
//!
//!     Client->>Server: POST /api/users/list
//!     Server->>Limiter: check(client ip)
//!     Limiter-->>Server: Admission
//!     Server->>Resolver: resolve("users/list")
//!     Resolver-->>Server: HandlerModule (cached or loaded)
//!     Server->>Adapter: adapt(native request)
//!     Adapter-->>Server: CanonicalRequest
//!     Server->>Dispatcher: invoke(handler, request)
//!     Dispatcher->>Runtime: run handler module
//!     Runtime-->>Dispatcher: response ops / return value
//!     Dispatcher-->>Server: ApiResponse or DispatchError
//!     Server-->>Client: status, headers, body + X-RateLimit-*
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use biniserve::config::{BiniConfig, Mode};
//! use biniserve::server::{find_open_port, AppContext, HttpServer};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BiniConfig::load(Path::new("."), Mode::Production)?;
//! let ctx = Arc::new(AppContext::from_config(&config, true).await?);
//! let listener = find_open_port(&config.server.host, config.port(), config.server.port_scan_span).await?;
//! let handle = HttpServer::new(ctx).start(listener)?;
//! handle.shutdown(config.shutdown_timeout()).await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod emit;
pub mod hot_reload;
pub mod ids;
pub mod logging;
pub mod middleware;
pub mod rate_limit;
pub mod resolver;
pub mod route;
pub mod runtime;
pub mod server;
pub mod static_files;
pub mod transpile;

pub use adapter::{ApiResponse, CanonicalRequest};
pub use config::{BiniConfig, Mode};
pub use dispatcher::{handler_fn, Dispatcher, Handler};
pub use resolver::Resolver;
pub use route::RouteName;
