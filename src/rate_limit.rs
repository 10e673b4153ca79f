//! Per-client sliding window rate limiting for `/api/*`.
//!
//! Each client identifier owns a queue of admission timestamps. On every check
//! the timestamps older than the window are dropped; the request is admitted
//! while fewer than `limit` remain. Idle identifiers are removed by
//! [`RateLimiter::sweep_idle`], which the server calls on an interval.

use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::adapter::{ApiResponse, ErrorBody};

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub limit: usize,
    /// Slots left in the current window after this check.
    pub remaining: usize,
    /// Time until the oldest timestamp in the window expires.
    pub reset_after: Duration,
}

impl Admission {
    /// Reset time as Unix seconds, relative to the wall clock `now`.
    pub fn reset_unix(&self, now: SystemTime) -> u64 {
        let at = now + self.reset_after;
        let since = at.duration_since(UNIX_EPOCH).unwrap_or_default();
        since.as_secs() + u64::from(since.subsec_nanos() > 0)
    }

    /// Stamp the rate-limit headers onto `response`.
    pub fn apply_headers(&self, response: &mut ApiResponse) {
        response.set_header(HEADER_LIMIT, self.limit.to_string());
        response.set_header(HEADER_REMAINING, self.remaining.to_string());
        response.set_header(
            HEADER_RESET,
            self.reset_unix(SystemTime::now()).to_string(),
        );
    }

    /// The 429 answer for a rejected check.
    pub fn rejection(&self) -> ApiResponse {
        let mut response = ApiResponse::error(429, ErrorBody::new("Too many requests"));
        self.apply_headers(&mut response);
        response
    }
}

/// Sliding window limiter keyed by client identifier.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    allow_list: HashSet<String>,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per client within a
    /// trailing `window`.
    ///
    /// # Arguments
    ///
    /// * `limit` - Requests admitted per client in any one window (default 100)
    /// * `window` - Length of the sliding window (default 60 s)
    ///
    /// # Example
    ///
    /// ```rust
    /// use biniserve::rate_limit::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(2, Duration::from_secs(60));
    /// assert!(limiter.check("10.0.0.1").allowed);
    /// assert!(limiter.check("10.0.0.1").allowed);
    /// assert!(!limiter.check("10.0.0.1").allowed);
    /// assert!(limiter.check("10.0.0.2").allowed);
    /// ```
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            allow_list: HashSet::new(),
            windows: DashMap::new(),
        }
    }

    /// Identifiers that are always admitted and never recorded.
    ///
    /// Replaces any earlier allow list. Matching is exact against the client
    /// identifier, so list addresses in the form the adapter reports them.
    ///
    /// # Example
    ///
    /// ```rust
    /// use biniserve::rate_limit::RateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = RateLimiter::new(1, Duration::from_secs(60))
    ///     .with_allow_list(["127.0.0.1".to_string()]);
    /// assert!(limiter.check("127.0.0.1").allowed);
    /// assert!(limiter.check("127.0.0.1").allowed);
    /// ```
    pub fn with_allow_list<I: IntoIterator<Item = String>>(mut self, ids: I) -> Self {
        self.allow_list = ids.into_iter().collect();
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, client: &str) -> Admission {
        self.check_at(client, Instant::now())
    }

    /// Admission check against an explicit clock reading.
    pub fn check_at(&self, client: &str, now: Instant) -> Admission {
        if self.allow_list.contains(client) {
            return Admission {
                allowed: true,
                limit: self.limit,
                remaining: self.limit,
                reset_after: self.window,
            };
        }

        let mut stamps = self.windows.entry(client.to_string()).or_default();
        while let Some(oldest) = stamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                stamps.pop_front();
            } else {
                break;
            }
        }

        let allowed = stamps.len() < self.limit;
        if allowed {
            stamps.push_back(now);
        } else {
            debug!(client, limit = self.limit, "rate limit exceeded");
        }

        let window_start = stamps.front().copied().unwrap_or(now);
        let reset_after = (window_start + self.window).saturating_duration_since(now);
        Admission {
            allowed,
            limit: self.limit,
            remaining: self.limit.saturating_sub(stamps.len()),
            reset_after,
        }
    }

    /// Drop identifiers whose newest timestamp has left the window.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, stamps| {
            stamps
                .back()
                .is_some_and(|newest| now.saturating_duration_since(*newest) < self.window)
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "swept idle rate limit windows");
        }
        removed
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hundredth_admitted_hundred_first_rejected() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        for i in 0..100 {
            let a = limiter.check_at("1.2.3.4", start + Duration::from_millis(i * 10));
            assert!(a.allowed, "request {i} should be admitted");
            assert_eq!(a.remaining, 99 - i as usize);
        }
        let rejected = limiter.check_at("1.2.3.4", start + Duration::from_secs(2));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, 0);
        assert_eq!(rejected.reset_after, Duration::from_secs(58));
    }

    #[test]
    fn test_admission_resumes_after_oldest_expires() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("c", start).allowed);
        assert!(limiter.check_at("c", start + Duration::from_secs(30)).allowed);
        assert!(!limiter.check_at("c", start + Duration::from_secs(59)).allowed);

        let resumed = limiter.check_at("c", start + Duration::from_secs(60));
        assert!(resumed.allowed);
        assert_eq!(resumed.remaining, 0);
        assert_eq!(resumed.reset_after, Duration::from_secs(30));
    }

    #[test]
    fn test_rejections_do_not_extend_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("c", start).allowed);
        for s in 1..60 {
            assert!(!limiter.check_at("c", start + Duration::from_secs(s)).allowed);
        }
        assert!(limiter.check_at("c", start + Duration::from_secs(60)).allowed);
    }

    #[test]
    fn test_clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).allowed);
        assert!(limiter.check_at("b", now).allowed);
        assert!(!limiter.check_at("a", now).allowed);
    }

    #[test]
    fn test_allow_list_bypasses_limit() {
        let limiter =
            RateLimiter::new(1, Duration::from_secs(60)).with_allow_list(["127.0.0.1".to_string()]);
        let now = Instant::now();
        for _ in 0..5 {
            assert!(limiter.check_at("127.0.0.1", now).allowed);
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_sweep_removes_idle_clients() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        limiter.check_at("old", start);
        limiter.check_at("fresh", start + Duration::from_secs(50));
        assert_eq!(limiter.sweep_idle(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_rejection_response_shape() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        limiter.check_at("x", now);
        let response = limiter.check_at("x", now).rejection();
        assert_eq!(response.status, 429);
        assert_eq!(response.header("x-ratelimit-limit"), Some("1"));
        assert_eq!(response.header("x-ratelimit-remaining"), Some("0"));
        assert!(response.header("x-ratelimit-reset").is_some());
        assert_eq!(
            response.json_body(),
            Some(serde_json::json!({"error": "Too many requests"}))
        );
    }

    #[test]
    fn test_reset_unix_rounds_up() {
        let admission = Admission {
            allowed: true,
            limit: 100,
            remaining: 99,
            reset_after: Duration::from_millis(59_500),
        };
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(admission.reset_unix(now), 1_060);
    }
}
