//! Cross-cutting request hooks run by the server around every response:
//! request metrics (including the in-flight count graceful shutdown waits
//! on) and CORS.

mod core;
mod cors;
mod memory;
mod metrics;

pub use core::Middleware;
pub use cors::CorsMiddleware;
pub use memory::MemorySnapshot;
pub use metrics::{InFlightGuard, MetricsMiddleware};
