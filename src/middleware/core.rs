use std::time::Duration;

use http::request::Parts;

use crate::adapter::ApiResponse;

/// Hook around every request the server answers.
///
/// `before` may short-circuit with a response; `after` sees the final
/// response, including short-circuited ones, and may add headers.
pub trait Middleware: Send + Sync {
    fn before(&self, _req: &Parts) -> Option<ApiResponse> {
        None
    }
    fn after(&self, _req: &Parts, _res: &mut ApiResponse, _latency: Duration) {}
}
