use std::time::Duration;

use http::header::{
    ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
};
use http::request::Parts;
use http::Method;

use super::Middleware;
use crate::adapter::ApiResponse;

/// CORS for the API surface.
///
/// The request `Origin` is reflected with credentials allowed, so any page can
/// call the API with cookies. Preflights (`OPTIONS` carrying
/// `Access-Control-Request-Method`) are answered with 204 and never reach a
/// handler; a plain `OPTIONS` is dispatched like any other verb.
pub struct CorsMiddleware {
    allowed_methods: Vec<Method>,
    max_age: Option<Duration>,
}

impl CorsMiddleware {
    pub fn new(allowed_methods: Vec<Method>) -> Self {
        Self {
            allowed_methods,
            max_age: None,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn methods(&self) -> String {
        self.allowed_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn is_preflight(req: &Parts) -> bool {
        req.method == Method::OPTIONS && req.headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    }
}

impl Default for CorsMiddleware {
    /// The verbs routed to `/api/*`.
    fn default() -> Self {
        Self::new(vec![
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
    }
}

impl Middleware for CorsMiddleware {
    fn before(&self, req: &Parts) -> Option<ApiResponse> {
        if !Self::is_preflight(req) {
            return None;
        }
        let mut res = ApiResponse::new(204);
        res.set_header("Access-Control-Allow-Methods", self.methods());
        if let Some(requested) = req
            .headers
            .get(ACCESS_CONTROL_REQUEST_HEADERS)
            .and_then(|v| v.to_str().ok())
        {
            res.set_header("Access-Control-Allow-Headers", requested.to_string());
        }
        if let Some(max_age) = self.max_age {
            res.set_header("Access-Control-Max-Age", max_age.as_secs().to_string());
        }
        res.set_header("Content-Length", "0".to_string());
        Some(res)
    }

    fn after(&self, req: &Parts, res: &mut ApiResponse, _latency: Duration) {
        let Some(origin) = req.headers.get(ORIGIN).and_then(|v| v.to_str().ok()) else {
            return;
        };
        res.set_header("Access-Control-Allow-Origin", origin.to_string());
        res.set_header("Access-Control-Allow-Credentials", "true".to_string());
        let vary = match res.header("Vary") {
            Some(existing) if !existing.to_ascii_lowercase().contains("origin") => format!("{existing}, Origin"),
            Some(existing) => existing.to_string(),
            None => "Origin".to_string(),
        };
        res.set_header("Vary", vary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(method: Method, headers: &[(&str, &str)]) -> Parts {
        let mut builder = http::Request::builder().method(method).uri("/api/hello");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_preflight_short_circuits() {
        let cors = CorsMiddleware::default();
        let req = parts(
            Method::OPTIONS,
            &[
                ("origin", "https://app.example"),
                ("access-control-request-method", "POST"),
                ("access-control-request-headers", "content-type, x-token"),
            ],
        );
        let mut res = cors.before(&req).unwrap();
        cors.after(&req, &mut res, Duration::ZERO);
        assert_eq!(res.status, 204);
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
        assert_eq!(res.header("access-control-allow-credentials"), Some("true"));
        assert_eq!(res.header("access-control-allow-headers"), Some("content-type, x-token"));
        assert!(res.header("access-control-allow-methods").unwrap().contains("PATCH"));
    }

    #[test]
    fn test_plain_options_is_dispatched() {
        let cors = CorsMiddleware::default();
        assert!(cors.before(&parts(Method::OPTIONS, &[])).is_none());
    }

    #[test]
    fn test_no_origin_no_headers() {
        let cors = CorsMiddleware::default();
        let req = parts(Method::GET, &[]);
        let mut res = ApiResponse::new(200);
        cors.after(&req, &mut res, Duration::ZERO);
        assert!(res.header("access-control-allow-origin").is_none());
    }

    #[test]
    fn test_vary_is_extended() {
        let cors = CorsMiddleware::default();
        let req = parts(Method::GET, &[("origin", "http://localhost:5173")]);
        let mut res = ApiResponse::new(200);
        res.set_header("Vary", "Accept-Encoding".to_string());
        cors.after(&req, &mut res, Duration::ZERO);
        assert_eq!(res.header("vary"), Some("Accept-Encoding, Origin"));
    }
}
