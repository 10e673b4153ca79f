use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;
use tracing::warn;

use crate::adapter::{ApiResponse, HeaderVec};
use crate::static_files::StaticReply;

/// Stamped on every response.
pub const POWERED_BY_HEADER: &str = "x-powered-by";
pub const POWERED_BY: &str = "Bini.js";

/// Body-less statuses; anything recorded for them is dropped.
fn forbids_body(status: StatusCode) -> bool {
    status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED
}

fn build(status: u16, headers: &HeaderVec, body: Bytes) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(status).unwrap_or_else(|_| {
        warn!(status, "handler set an invalid status code; answering 500");
        StatusCode::INTERNAL_SERVER_ERROR
    });
    let body = if forbids_body(status) { Bytes::new() } else { body };
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    let map = response.headers_mut();
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!(header = %name, "dropping header that is not valid HTTP"),
        }
    }
    map.insert(
        HeaderName::from_static(POWERED_BY_HEADER),
        HeaderValue::from_static(POWERED_BY),
    );
    response
}

/// Convert a dispatch result into a hyper response.
pub fn api_into_hyper(res: ApiResponse) -> Response<Full<Bytes>> {
    build(res.status, &res.headers, Bytes::from(res.body))
}

pub fn static_into_hyper(res: StaticReply) -> Response<Full<Bytes>> {
    build(res.status, &res.headers, res.body)
}
