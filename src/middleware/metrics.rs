use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::request::Parts;

use super::Middleware;
use crate::adapter::ApiResponse;

/// Request counters for `/metrics`.
///
/// All counters are relaxed atomics; readers get an eventually consistent view.
/// The in-flight count is maintained by [`InFlightGuard`] rather than by the
/// hooks so it also covers requests that never reach `after`.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    request_count: AtomicUsize,
    total_latency_ns: AtomicU64,
    active_requests: AtomicUsize,
    top_level_requests: AtomicUsize,
    rate_limited: AtomicUsize,
    server_errors: AtomicUsize,
}

impl MetricsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of requests that went through the hooks.
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Mean latency, zero before the first request.
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::from_nanos(0)
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Count a request to `/health` or `/metrics`.
    pub fn inc_top_level_request(&self) {
        self.top_level_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn top_level_request_count(&self) -> usize {
        self.top_level_requests.load(Ordering::Relaxed)
    }

    pub fn rate_limited(&self) -> usize {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn server_errors(&self) -> usize {
        self.server_errors.load(Ordering::Relaxed)
    }

    /// Requests accepted but not yet answered.
    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Acquire)
    }

    /// Mark a request in flight until the guard drops.
    pub fn track(self: &Arc<Self>) -> InFlightGuard {
        self.active_requests.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            metrics: Arc::clone(self),
        }
    }
}

impl Middleware for MetricsMiddleware {
    fn before(&self, _req: &Parts) -> Option<ApiResponse> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn after(&self, _req: &Parts, res: &mut ApiResponse, latency: Duration) {
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        match res.status {
            429 => {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

/// Decrements the in-flight count on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    metrics: Arc<MetricsMiddleware>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.active_requests.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> Parts {
        http::Request::builder()
            .uri("/api/hello")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_counts_and_latency() {
        let m = MetricsMiddleware::new();
        let req = parts();
        for (status, ms) in [(200, 10), (429, 20), (503, 30)] {
            assert!(m.before(&req).is_none());
            let mut res = ApiResponse::new(status);
            m.after(&req, &mut res, Duration::from_millis(ms));
        }
        assert_eq!(m.request_count(), 3);
        assert_eq!(m.average_latency(), Duration::from_millis(20));
        assert_eq!(m.rate_limited(), 1);
        assert_eq!(m.server_errors(), 1);
    }

    #[test]
    fn test_in_flight_guard() {
        let m = Arc::new(MetricsMiddleware::new());
        let a = m.track();
        let b = m.track();
        assert_eq!(m.active_requests(), 2);
        drop(a);
        assert_eq!(m.active_requests(), 1);
        drop(b);
        assert_eq!(m.active_requests(), 0);
    }
}
