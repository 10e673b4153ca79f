//! Pass-through file server for the compiled bundle in `dist/`.
//!
//! Requests map onto files below the root with `..`, absolute and hidden
//! components refused. Directories serve their `index.html`. Page routes the
//! bundle does not contain fall back to the root `index.html` so the client
//! router can take over; missing assets (anything whose last segment has an
//! extension) are a plain 404.

use bytes::Bytes;
use http::Method;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

use crate::adapter::{get_header, set_header, HeaderVec};
use crate::config::Mode;

pub const INDEX_FILE: &str = "index.html";

pub const NOT_FOUND_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>404 - Not Found</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
  </head>
  <body>
    <h1>404 Not Found</h1>
    <p>The page you're looking for doesn't exist.</p>
  </body>
</html>
"#;

const CACHE_PRODUCTION: &str = "public, max-age=31536000";
const CACHE_DEVELOPMENT: &str = "no-cache";

/// A fully formed static response.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticReply {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Bytes,
}

impl StaticReply {
    fn new(status: u16, content_type: &str, body: Bytes) -> Self {
        let mut headers = HeaderVec::new();
        set_header(&mut headers, "Content-Type", content_type.to_string());
        Self { status, headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        get_header(&self.headers, name)
    }
}

enum Mapped {
    File(PathBuf),
    Forbidden,
    Missing,
}

pub struct StaticFiles {
    root: PathBuf,
    mode: Mode,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(root: P, mode: Mode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.root.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    fn is_hidden(url_path: &str) -> bool {
        url_path
            .split('/')
            .any(|segment| segment.starts_with('.') && segment != "." && segment != "..")
    }

    async fn lookup(&self, url_path: &str) -> Mapped {
        if Self::is_hidden(url_path) {
            return Mapped::Forbidden;
        }
        let Some(path) = self.map_path(url_path) else {
            return Mapped::Forbidden;
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Mapped::File(path),
            Ok(meta) if meta.is_dir() => {
                let index = path.join(INDEX_FILE);
                match tokio::fs::metadata(&index).await {
                    Ok(m) if m.is_file() => Mapped::File(index),
                    _ => Mapped::Missing,
                }
            }
            _ => Mapped::Missing,
        }
    }

    /// Answer a request for `url_path` (no query string).
    pub async fn serve(&self, method: &Method, url_path: &str, if_none_match: Option<&str>) -> io::Result<StaticReply> {
        let head = method == Method::HEAD;
        if method != Method::GET && !head {
            return Ok(not_found());
        }
        match self.lookup(url_path).await {
            Mapped::File(path) => self.file(&path, if_none_match, head).await,
            Mapped::Forbidden => {
                debug!(path = url_path, "refused static path");
                Ok(StaticReply::new(403, "text/plain; charset=utf-8", Bytes::from_static(b"Forbidden")))
            }
            Mapped::Missing if is_asset_path(url_path) => Ok(not_found()),
            Mapped::Missing => self.fallback(head).await,
        }
    }

    /// The SPA entry document, or the 404 page when the bundle has none.
    pub async fn fallback(&self, head: bool) -> io::Result<StaticReply> {
        let index = self.root.join(INDEX_FILE);
        match tokio::fs::read(&index).await {
            Ok(bytes) => {
                let mut reply = StaticReply::new(200, "text/html; charset=utf-8", body_for(bytes, head));
                set_header(&mut reply.headers, "Cache-Control", CACHE_DEVELOPMENT.to_string());
                Ok(reply)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(not_found()),
            Err(e) => Err(e),
        }
    }

    async fn file(&self, path: &Path, if_none_match: Option<&str>, head: bool) -> io::Result<StaticReply> {
        let meta = tokio::fs::metadata(path).await?;
        let tag = etag(&meta);
        let cache_control = if self.mode.is_dev() {
            CACHE_DEVELOPMENT
        } else {
            CACHE_PRODUCTION
        };

        if if_none_match.is_some_and(|v| etag_matches(v, &tag)) {
            let mut headers = HeaderVec::new();
            set_header(&mut headers, "ETag", tag);
            set_header(&mut headers, "Cache-Control", cache_control.to_string());
            return Ok(StaticReply {
                status: 304,
                headers,
                body: Bytes::new(),
            });
        }

        let bytes = tokio::fs::read(path).await?;
        let mut reply = StaticReply::new(200, content_type(path), body_for(bytes, head));
        set_header(&mut reply.headers, "ETag", tag);
        set_header(&mut reply.headers, "Cache-Control", cache_control.to_string());
        Ok(reply)
    }
}

fn body_for(bytes: Vec<u8>, head: bool) -> Bytes {
    if head {
        Bytes::new()
    } else {
        Bytes::from(bytes)
    }
}

pub fn not_found() -> StaticReply {
    StaticReply::new(404, "text/html; charset=utf-8", Bytes::from_static(NOT_FOUND_PAGE.as_bytes()))
}

/// Whether the last path segment names a file (has an extension).
pub fn is_asset_path(url_path: &str) -> bool {
    url_path
        .rsplit('/')
        .next()
        .and_then(|last| last.rsplit_once('.'))
        .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

/// Weak validator from size and modification time.
fn etag(meta: &std::fs::Metadata) -> String {
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("W/\"{:x}-{:x}\"", meta.len(), mtime)
}

fn etag_matches(header: &str, tag: &str) -> bool {
    let bare = tag.trim_start_matches("W/");
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == bare)
}

pub fn content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
        .as_str()
    {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript; charset=utf-8",
        "json" | "map" => "application/json; charset=utf-8",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn bundle() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<div id=root></div>").unwrap();
        fs::create_dir_all(dir.path().join("assets")).unwrap();
        fs::write(dir.path().join("assets/app.js"), "console.log(1)").unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "docs").unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        dir
    }

    #[test]
    fn test_map_path_prevents_traversal() {
        let sf = StaticFiles::new("dist", Mode::Production);
        assert!(sf.map_path("../Cargo.toml").is_none());
        assert!(sf.map_path("/assets/../../etc/passwd").is_none());
        assert_eq!(sf.map_path("/assets/./app.js"), Some(PathBuf::from("dist/assets/app.js")));
    }

    #[test]
    fn test_asset_detection() {
        assert!(is_asset_path("/assets/app.js"));
        assert!(is_asset_path("/favicon.ico"));
        assert!(!is_asset_path("/dashboard/settings"));
        assert!(!is_asset_path("/"));
        assert!(!is_asset_path("/.well"));
    }

    #[tokio::test]
    async fn test_serves_file_with_headers() {
        let dir = bundle();
        let sf = StaticFiles::new(dir.path(), Mode::Production);
        let reply = sf.serve(&Method::GET, "/assets/app.js", None).await.unwrap();
        assert_eq!(reply.status, 200);
        assert_eq!(reply.header("content-type"), Some("application/javascript; charset=utf-8"));
        assert_eq!(reply.header("cache-control"), Some(CACHE_PRODUCTION));
        assert!(reply.header("etag").unwrap().starts_with("W/\""));
        assert_eq!(&reply.body[..], b"console.log(1)");
    }

    #[tokio::test]
    async fn test_etag_revalidation() {
        let dir = bundle();
        let sf = StaticFiles::new(dir.path(), Mode::Development);
        let first = sf.serve(&Method::GET, "/assets/app.js", None).await.unwrap();
        assert_eq!(first.header("cache-control"), Some(CACHE_DEVELOPMENT));
        let tag = first.header("etag").unwrap().to_string();
        let second = sf.serve(&Method::GET, "/assets/app.js", Some(&tag)).await.unwrap();
        assert_eq!(second.status, 304);
        assert!(second.body.is_empty());
    }

    #[tokio::test]
    async fn test_directory_index_and_spa_fallback() {
        let dir = bundle();
        let sf = StaticFiles::new(dir.path(), Mode::Production);
        let docs = sf.serve(&Method::GET, "/docs/", None).await.unwrap();
        assert_eq!(&docs.body[..], b"docs");

        let page = sf.serve(&Method::GET, "/dashboard/settings", None).await.unwrap();
        assert_eq!(page.status, 200);
        assert_eq!(&page.body[..], b"<div id=root></div>");

        let asset = sf.serve(&Method::GET, "/assets/missing.js", None).await.unwrap();
        assert_eq!(asset.status, 404);
    }

    #[tokio::test]
    async fn test_hidden_and_traversal_refused() {
        let dir = bundle();
        let sf = StaticFiles::new(dir.path(), Mode::Production);
        assert_eq!(sf.serve(&Method::GET, "/.env", None).await.unwrap().status, 403);
        assert_eq!(sf.serve(&Method::GET, "/../secret", None).await.unwrap().status, 403);
    }

    #[tokio::test]
    async fn test_missing_index_gives_404_page() {
        let dir = tempfile::tempdir().unwrap();
        let sf = StaticFiles::new(dir.path(), Mode::Production);
        let reply = sf.serve(&Method::GET, "/about", None).await.unwrap();
        assert_eq!(reply.status, 404);
        assert!(String::from_utf8_lossy(&reply.body).contains("<h1>404 Not Found</h1>"));
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let dir = bundle();
        let sf = StaticFiles::new(dir.path(), Mode::Production);
        let reply = sf.serve(&Method::HEAD, "/assets/app.js", None).await.unwrap();
        assert_eq!(reply.status, 200);
        assert!(reply.body.is_empty());
        assert_eq!(sf.serve(&Method::POST, "/assets/app.js", None).await.unwrap().status, 404);
    }
}
