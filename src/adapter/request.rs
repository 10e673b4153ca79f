//! Native request shapes and their normalization into [`CanonicalRequest`].

use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use thiserror::Error;

/// Methods whose JSON bodies are parsed. Everything else gets `{}`.
pub const BODY_METHODS: [&str; 4] = ["POST", "PUT", "PATCH", "DELETE"];

/// Headers consulted, in order, when deriving the client address behind a proxy.
/// `x-forwarded-for` is checked before these and contributes its first entry.
pub const CLIENT_IP_HEADERS: [&str; 3] = [
    "cf-connecting-ip",
    "x-nf-client-connection-ip",
    "x-real-ip",
];

/// Client address reported when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The request shape every handler receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Upper-case HTTP verb.
    pub method: String,
    /// Lower-case header names; repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON body, or `{}`.
    pub body: Value,
    /// Query parameters; the last occurrence of a repeated key wins.
    pub query: BTreeMap<String, String>,
    /// Always empty; route parameters are not extracted.
    pub params: BTreeMap<String, String>,
    pub ip: String,
    /// Path and query as received.
    pub url: String,
}

impl CanonicalRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// What to do with a body that claims to be JSON but does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Fail the request with [`AdapterError::InvalidJson`].
    Reject,
    /// Substitute `{}`.
    Lenient,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("body is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("invalid request URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Raw request read straight off a connection; the adapter parses the body.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
}

/// Request whose body a framework layer has already parsed.
#[derive(Debug, Clone)]
pub struct FrameworkRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// `None` when the framework found no body.
    pub body: Option<Value>,
    /// Client address the framework already derived.
    pub ip: Option<String>,
}

/// Serverless event (AWS / Netlify style).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlatformEvent {
    pub http_method: String,
    pub path: String,
    pub raw_query: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
    pub request_context: Option<Value>,
}

/// Fetch-style request, as edge runtimes hand them over.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Every request shape the engine accepts.
#[derive(Debug, Clone)]
pub enum NativeRequest {
    Stream(StreamRequest),
    Framework(FrameworkRequest),
    PlatformEvent(PlatformEvent),
    Fetch(FetchRequest),
}

impl NativeRequest {
    /// Malformed JSON handling for this shape: raw streams reject it,
    /// serverless shapes fall back to `{}`.
    pub fn body_policy(&self) -> BodyPolicy {
        match self {
            NativeRequest::Stream(_) => BodyPolicy::Reject,
            NativeRequest::Framework(_) => BodyPolicy::Reject,
            NativeRequest::PlatformEvent(_) | NativeRequest::Fetch(_) => BodyPolicy::Lenient,
        }
    }
}

/// Normalization settings.
#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    /// Honour proxy headers for the client address.
    pub trust_proxy: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self { trust_proxy: true }
    }
}

/// Normalize any native request into the canonical shape.
pub fn adapt(native: NativeRequest, opts: &AdapterOptions) -> Result<CanonicalRequest, AdapterError> {
    let policy = native.body_policy();
    match native {
        NativeRequest::Stream(req) => {
            let headers = header_map(&req.headers);
            let method = req.method.as_str().to_ascii_uppercase();
            let body = parse_body(&method, headers.get("content-type").map(String::as_str), &req.body, policy)?;
            let socket = req.remote_addr.map(|a| a.ip().to_string());
            Ok(CanonicalRequest {
                ip: client_ip(&headers, socket.as_deref(), opts.trust_proxy),
                query: parse_query(req.uri.query()),
                url: path_and_query(&req.uri),
                method,
                headers,
                body,
                params: BTreeMap::new(),
            })
        }
        NativeRequest::Framework(req) => {
            let headers = header_map(&req.headers);
            let ip = req
                .ip
                .unwrap_or_else(|| client_ip(&headers, None, opts.trust_proxy));
            Ok(CanonicalRequest {
                method: req.method.as_str().to_ascii_uppercase(),
                query: parse_query(req.uri.query()),
                url: path_and_query(&req.uri),
                body: req.body.unwrap_or_else(empty_object),
                headers,
                ip,
                params: BTreeMap::new(),
            })
        }
        NativeRequest::PlatformEvent(event) => adapt_event(event, opts, policy),
        NativeRequest::Fetch(req) => {
            let url = url::Url::parse(&req.url).map_err(|e| AdapterError::InvalidUrl {
                url: req.url.clone(),
                reason: e.to_string(),
            })?;
            let headers = header_map(&req.headers);
            let method = req.method.as_str().to_ascii_uppercase();
            let raw = req.body.unwrap_or_default();
            let body = parse_body(&method, headers.get("content-type").map(String::as_str), &raw, policy)?;
            let mut path = url.path().to_string();
            if let Some(q) = url.query() {
                path.push('?');
                path.push_str(q);
            }
            Ok(CanonicalRequest {
                ip: client_ip(&headers, None, opts.trust_proxy),
                query: parse_query(url.query()),
                url: path,
                method,
                headers,
                body,
                params: BTreeMap::new(),
            })
        }
    }
}

fn adapt_event(
    event: PlatformEvent,
    opts: &AdapterOptions,
    policy: BodyPolicy,
) -> Result<CanonicalRequest, AdapterError> {
    let headers: BTreeMap<String, String> = event
        .headers
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v))
        .collect();
    let method = if event.http_method.is_empty() {
        "GET".to_string()
    } else {
        event.http_method.to_ascii_uppercase()
    };

    let raw = match event.body {
        Some(body) if event.is_base64_encoded => base64::engine::general_purpose::STANDARD
            .decode(body.as_bytes())
            .map_err(|e| AdapterError::InvalidBase64(e.to_string()))?,
        Some(body) => body.into_bytes(),
        None => Vec::new(),
    };
    let body = parse_body(&method, headers.get("content-type").map(String::as_str), &raw, policy)?;

    let (query, raw_query) = match (event.query_string_parameters, event.raw_query) {
        (Some(params), raw) if !params.is_empty() => {
            let raw = raw.filter(|r| !r.is_empty()).unwrap_or_else(|| {
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(params.iter())
                    .finish()
            });
            (params, Some(raw))
        }
        (_, Some(raw)) if !raw.is_empty() => (parse_query(Some(&raw)), Some(raw)),
        _ => (BTreeMap::new(), None),
    };

    let path = if event.path.is_empty() {
        "/".to_string()
    } else {
        event.path
    };
    let url = match raw_query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };

    let socket = event.request_context.as_ref().and_then(event_source_ip);
    Ok(CanonicalRequest {
        ip: client_ip(&headers, socket.as_deref(), opts.trust_proxy),
        method,
        headers,
        body,
        query,
        params: BTreeMap::new(),
        url,
    })
}

/// `requestContext.identity.sourceIp` (REST) or `requestContext.http.sourceIp` (HTTP API).
fn event_source_ip(ctx: &Value) -> Option<String> {
    ctx.pointer("/identity/sourceIp")
        .or_else(|| ctx.pointer("/http/sourceIp"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Whether the content type names JSON (`application/json` or a `+json` suffix).
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Parse a request body. Only body-carrying methods with a JSON content type
/// are parsed; an empty body is `{}`.
pub fn parse_body(
    method: &str,
    content_type: Option<&str>,
    raw: &[u8],
    policy: BodyPolicy,
) -> Result<Value, AdapterError> {
    let wants_body = BODY_METHODS.iter().any(|m| m.eq_ignore_ascii_case(method));
    if !wants_body || !content_type.is_some_and(is_json_content_type) {
        return Ok(empty_object());
    }
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(empty_object());
    }
    match serde_json::from_slice(raw) {
        Ok(value) => Ok(value),
        Err(e) => match policy {
            BodyPolicy::Reject => Err(AdapterError::InvalidJson(e.to_string())),
            BodyPolicy::Lenient => Ok(empty_object()),
        },
    }
}

/// Decode a query string; the last occurrence of a key wins.
pub fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if let Some(q) = query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            out.insert(k.into_owned(), v.into_owned());
        }
    }
    out
}

/// Flatten an `http::HeaderMap` into lower-case names with joined values.
/// Values that are not valid UTF-8 are dropped.
pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

/// Derive the client address: proxy headers (when trusted), then the socket,
/// then [`UNKNOWN_CLIENT`].
pub fn client_ip(headers: &BTreeMap<String, String>, socket: Option<&str>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
        for name in CLIENT_IP_HEADERS {
            if let Some(ip) = headers.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
                return ip.to_string();
            }
        }
    }
    socket
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;

    fn stream(method: Method, uri: &str, content_type: Option<&str>, body: &str) -> NativeRequest {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type", HeaderValue::from_str(ct).unwrap());
        }
        NativeRequest::Stream(StreamRequest {
            method,
            uri: uri.parse().unwrap(),
            headers,
            body: Bytes::from(body.to_string()),
            remote_addr: Some("10.0.0.7:5123".parse().unwrap()),
        })
    }

    #[test]
    fn test_stream_json_post() {
        let req = adapt(
            stream(Method::POST, "/api/users?page=2", Some("application/json"), r#"{"name":"ada"}"#),
            &AdapterOptions::default(),
        )
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, json!({"name": "ada"}));
        assert_eq!(req.query.get("page").map(String::as_str), Some("2"));
        assert_eq!(req.url, "/api/users?page=2");
        assert_eq!(req.ip, "10.0.0.7");
        assert!(req.params.is_empty());
    }

    #[test]
    fn test_stream_malformed_json_rejected() {
        let err = adapt(
            stream(Method::POST, "/api/x", Some("application/json"), "{nope"),
            &AdapterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidJson(_)));
    }

    #[test]
    fn test_body_ignored_for_get_and_non_json() {
        let get = adapt(
            stream(Method::GET, "/api/x", Some("application/json"), r#"{"a":1}"#),
            &AdapterOptions::default(),
        )
        .unwrap();
        assert_eq!(get.body, json!({}));

        let text = adapt(
            stream(Method::POST, "/api/x", Some("text/plain"), "{nope"),
            &AdapterOptions::default(),
        )
        .unwrap();
        assert_eq!(text.body, json!({}));
    }

    #[test]
    fn test_json_content_type_variants() {
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(is_json_content_type("application/vnd.api+json"));
        assert!(!is_json_content_type("text/json-ish"));
    }

    #[test]
    fn test_query_last_occurrence_wins() {
        let q = parse_query(Some("tag=a&tag=b&name=x%20y"));
        assert_eq!(q.get("tag").map(String::as_str), Some("b"));
        assert_eq!(q.get("name").map(String::as_str), Some("x y"));
    }

    #[test]
    fn test_client_ip_order() {
        let mut headers = BTreeMap::new();
        assert_eq!(client_ip(&headers, None, true), "unknown");
        assert_eq!(client_ip(&headers, Some("1.1.1.1"), true), "1.1.1.1");
        headers.insert("x-real-ip".to_string(), "2.2.2.2".to_string());
        assert_eq!(client_ip(&headers, Some("1.1.1.1"), true), "2.2.2.2");
        headers.insert("cf-connecting-ip".to_string(), "3.3.3.3".to_string());
        assert_eq!(client_ip(&headers, Some("1.1.1.1"), true), "3.3.3.3");
        headers.insert("x-forwarded-for".to_string(), " 4.4.4.4, 5.5.5.5".to_string());
        assert_eq!(client_ip(&headers, Some("1.1.1.1"), true), "4.4.4.4");
        assert_eq!(client_ip(&headers, Some("1.1.1.1"), false), "1.1.1.1");
    }

    #[test]
    fn test_platform_event_is_lenient() {
        let event: PlatformEvent = serde_json::from_value(json!({
            "httpMethod": "post",
            "path": "/api/hello",
            "headers": {"Content-Type": "application/json", "X-Forwarded-For": "9.9.9.9"},
            "queryStringParameters": {"q": "1"},
            "body": "{broken",
            "isBase64Encoded": false
        }))
        .unwrap();
        let req = adapt(NativeRequest::PlatformEvent(event), &AdapterOptions::default()).unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, json!({}));
        assert_eq!(req.ip, "9.9.9.9");
        assert_eq!(req.url, "/api/hello?q=1");
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_platform_event_base64_body() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(r#"{"n":3}"#);
        let event = PlatformEvent {
            http_method: "PUT".to_string(),
            path: "/api/n".to_string(),
            headers: Some(BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )])),
            body: Some(encoded),
            is_base64_encoded: true,
            request_context: Some(json!({"identity": {"sourceIp": "8.8.4.4"}})),
            ..PlatformEvent::default()
        };
        let req = adapt(NativeRequest::PlatformEvent(event), &AdapterOptions::default()).unwrap();
        assert_eq!(req.body, json!({"n": 3}));
        assert_eq!(req.ip, "8.8.4.4");
    }

    #[test]
    fn test_fetch_request() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("7.7.7.7"));
        let req = adapt(
            NativeRequest::Fetch(FetchRequest {
                method: Method::DELETE,
                url: "https://example.com/api/items?id=4&id=5".to_string(),
                headers,
                body: Some(Bytes::from_static(b"[1]")),
            }),
            &AdapterOptions::default(),
        )
        .unwrap();
        assert_eq!(req.url, "/api/items?id=4&id=5");
        assert_eq!(req.query.get("id").map(String::as_str), Some("5"));
        assert_eq!(req.body, json!([1]));
        assert_eq!(req.ip, "7.7.7.7");
    }

    #[test]
    fn test_framework_body_passes_through() {
        let req = adapt(
            NativeRequest::Framework(FrameworkRequest {
                method: Method::PATCH,
                uri: "/api/p".parse().unwrap(),
                headers: HeaderMap::new(),
                body: Some(json!("scalar")),
                ip: Some("127.0.0.1".to_string()),
            }),
            &AdapterOptions::default(),
        )
        .unwrap();
        assert_eq!(req.body, json!("scalar"));
        assert_eq!(req.ip, "127.0.0.1");
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        let map = header_map(&headers);
        assert_eq!(map.get("accept").map(String::as_str), Some("text/html, application/json"));
    }
}
