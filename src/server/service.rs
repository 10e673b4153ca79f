use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::request::Parts;
use http::{header, Method, Request, Response};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use serde_json::{json, Value};
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};

use super::context::{AppContext, FrontDoor};
use super::response::{api_into_hyper, static_into_hyper};
use crate::adapter::{
    adapt, client_ip, header_map, is_json_content_type, AdapterError, ApiResponse, ErrorBody, FrameworkRequest,
    NativeRequest, StreamRequest, BODY_METHODS,
};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use crate::middleware::MemorySnapshot;
use crate::resolver::ResolveError;
use crate::route::{RouteName, API_PREFIX};
use crate::static_files;

type BoxError = Box<dyn StdError + Send + Sync>;

/// The per-connection request handler. Cheap to clone.
#[derive(Clone)]
pub struct AppService {
    ctx: Arc<AppContext>,
}

impl AppService {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Answer one request. Never fails: every error becomes a response.
    pub async fn handle<B>(&self, req: Request<B>, remote: Option<SocketAddr>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let _in_flight = self.ctx.metrics.track();
        let (parts, body) = req.into_parts();
        let request_id = RequestId::from_header_or_new(
            parts
                .headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok()),
        );
        let path = parts.uri.path().to_string();
        let span = info_span!("request", request_id = %request_id, method = %parts.method, path = %path);

        async move {
            if is_api_path(&path) {
                let mut res = self.api(&parts, body, remote).await;
                res.set_header("X-Request-Id", request_id.to_string());
                return api_into_hyper(res);
            }
            match (&parts.method, path.as_str()) {
                (&Method::GET | &Method::HEAD, "/health") => {
                    self.ctx.metrics.inc_top_level_request();
                    api_into_hyper(health_endpoint(&self.ctx))
                }
                (&Method::GET | &Method::HEAD, "/metrics") => {
                    self.ctx.metrics.inc_top_level_request();
                    api_into_hyper(metrics_endpoint(&self.ctx))
                }
                _ => {
                    self.ctx.metrics.inc_top_level_request();
                    self.static_file(&parts, &path).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn static_file(&self, parts: &Parts, path: &str) -> Response<Full<Bytes>> {
        let Some(files) = &self.ctx.static_files else {
            return static_into_hyper(static_files::not_found());
        };
        let if_none_match = parts
            .headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok());
        match files.serve(&parts.method, path, if_none_match).await {
            Ok(reply) => static_into_hyper(reply),
            Err(e) => {
                error!(error = %e, "static file read failed");
                static_into_hyper(static_files::not_found())
            }
        }
    }

    /// The `/api/*` pipeline: hooks, rate limit, body, resolve, adapt, invoke.
    async fn api<B>(&self, parts: &Parts, body: B, remote: Option<SocketAddr>) -> ApiResponse
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let ctx = &self.ctx;
        let started = Instant::now();
        let headers = header_map(&parts.headers);
        let socket = remote.map(|a| a.ip().to_string());
        let client = client_ip(&headers, socket.as_deref(), ctx.adapter.trust_proxy);

        let admission = ctx.limiter.check(&client);
        let mut early = (!admission.allowed).then(|| admission.rejection());
        for mw in &ctx.middlewares {
            let res = mw.before(parts);
            if early.is_none() {
                early = res;
            }
        }

        let (mut res, route) = match early {
            Some(res) => (res, None),
            None => self.dispatch(parts, body, remote, &client).await,
        };

        let latency = started.elapsed();
        for mw in &ctx.middlewares {
            mw.after(parts, &mut res, latency);
        }
        admission.apply_headers(&mut res);

        info!(
            route = route.as_ref().map(RouteName::as_str).unwrap_or("-"),
            method = %parts.method,
            status = res.status,
            latency_ms = latency.as_millis() as u64,
            client = %client,
            "api request"
        );
        res
    }

    async fn dispatch<B>(
        &self,
        parts: &Parts,
        body: B,
        remote: Option<SocketAddr>,
        client: &str,
    ) -> (ApiResponse, Option<RouteName>)
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let ctx = &self.ctx;
        let path = parts.uri.path();

        let raw = match read_body(body, ctx.body_limit).await {
            Ok(raw) => raw,
            Err(res) => return (res, None),
        };

        let route = match RouteName::from_request_path(path) {
            Ok(route) => route,
            Err(e) => return (ResolveError::InvalidRoute(e).to_response(path, ctx.mode), None),
        };
        let module = match ctx.resolver.resolve(&route).await {
            Ok(module) => module,
            Err(e) => {
                if !matches!(e, ResolveError::NotFound { .. }) {
                    error!(%route, error = %e, "handler resolution failed");
                }
                return (e.to_response(route.as_str(), ctx.mode), Some(route));
            }
        };

        let native = match ctx.front_door {
            FrontDoor::DevStream => NativeRequest::Stream(StreamRequest {
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                headers: parts.headers.clone(),
                body: raw,
                remote_addr: remote,
            }),
            FrontDoor::Production => match pre_parse(parts, &raw) {
                Ok(body) => NativeRequest::Framework(FrameworkRequest {
                    method: parts.method.clone(),
                    uri: parts.uri.clone(),
                    headers: parts.headers.clone(),
                    body,
                    ip: Some(client.to_string()),
                }),
                Err(res) => return (res, Some(route)),
            },
        };

        let request = match adapt(native, &ctx.adapter) {
            Ok(request) => request,
            Err(AdapterError::InvalidJson(_)) => {
                return (ApiResponse::error(400, ErrorBody::new("Invalid JSON")), Some(route));
            }
            Err(e) => {
                return (
                    ApiResponse::error(400, ErrorBody::new("Bad Request").with_message(e.to_string())),
                    Some(route),
                );
            }
        };

        let res = match ctx.dispatcher.invoke(&route, module.handler(), request).await {
            Ok(res) => res,
            Err(e) => e.to_response(ctx.mode),
        };
        (res, Some(route))
    }
}

/// Whether `path` is owned by the dispatch engine.
pub fn is_api_path(path: &str) -> bool {
    path == API_PREFIX || path.starts_with("/api/")
}

async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, ApiResponse>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(ApiResponse::error(
            413,
            ErrorBody::new("Payload Too Large")
                .with_message(format!("Request body is larger than {limit} bytes")),
        )),
        Err(e) => Err(ApiResponse::error(
            400,
            ErrorBody::new("Bad Request").with_message(format!("failed to read request body: {e}")),
        )),
    }
}

/// Production body parsing: JSON bodies are parsed before dispatch and a
/// malformed one is answered here.
fn pre_parse(parts: &Parts, raw: &Bytes) -> Result<Option<Value>, ApiResponse> {
    let carries_body = BODY_METHODS.iter().any(|m| parts.method.as_str().eq_ignore_ascii_case(m));
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(is_json_content_type);
    if !carries_body || !is_json || raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(raw).map(Some).map_err(|e| {
        ApiResponse::json(
            400,
            &json!({ "statusCode": 400, "error": "Bad Request", "message": e.to_string() }),
        )
    })
}

/// `GET /health`: liveness with uptime, memory and runtime details.
pub fn health_endpoint(ctx: &AppContext) -> ApiResponse {
    let mut res = ApiResponse::json(
        200,
        &json!({
            "status": "ok",
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "uptime": ctx.uptime().as_secs_f64(),
            "memory": MemorySnapshot::current(),
            "runtime": {
                "version": ctx.runtime_version,
                "env": ctx.mode.as_str(),
            },
        }),
    );
    res.set_header("Cache-Control", "no-cache, no-store, must-revalidate".to_string());
    res
}

/// `GET /metrics`: process counters.
pub fn metrics_endpoint(ctx: &AppContext) -> ApiResponse {
    let m = &ctx.metrics;
    let mut res = ApiResponse::json(
        200,
        &json!({
            "server": {
                "uptime": ctx.uptime().as_secs_f64(),
                "activeRequests": m.active_requests(),
                "handlersCached": ctx.resolver.cached_handlers(),
                "requests": m.request_count(),
                "averageLatencyMs": m.average_latency().as_secs_f64() * 1000.0,
                "rateLimited": m.rate_limited(),
                "serverErrors": m.server_errors(),
                "topLevelRequests": m.top_level_request_count(),
                "rateLimitClients": ctx.limiter.tracked_clients(),
            },
            "memory": MemorySnapshot::current(),
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }),
    );
    res.set_header("Cache-Control", "no-cache".to_string());
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_path_detection() {
        assert!(is_api_path("/api"));
        assert!(is_api_path("/api/"));
        assert!(is_api_path("/api/users/list"));
        assert!(!is_api_path("/apiary"));
        assert!(!is_api_path("/"));
    }

    #[test]
    fn test_pre_parse() {
        let parts = |ct: &str| {
            Request::post("/api/x")
                .header("content-type", ct)
                .body(())
                .unwrap()
                .into_parts()
                .0
        };
        let json = parts("application/json");
        assert_eq!(
            pre_parse(&json, &Bytes::from_static(br#"{"a":1}"#)).unwrap(),
            Some(json!({"a": 1}))
        );
        assert_eq!(pre_parse(&json, &Bytes::from_static(b"  ")).unwrap(), None);
        let err = pre_parse(&json, &Bytes::from_static(b"{oops")).unwrap_err();
        assert_eq!(err.status, 400);
        let body = err.json_body().unwrap();
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["error"], "Bad Request");
        assert!(body["message"].is_string());

        let text = parts("text/plain");
        assert_eq!(pre_parse(&text, &Bytes::from_static(b"{oops")).unwrap(), None);
    }
}
