#![allow(dead_code)]

pub mod project {
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// A throwaway project root with an `src/app/api` tree.
    pub struct TestProject {
        dir: TempDir,
    }

    impl TestProject {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir_all(dir.path().join("src/app/api")).unwrap();
            Self { dir }
        }

        pub fn root(&self) -> &Path {
            self.dir.path()
        }

        pub fn api_dir(&self) -> PathBuf {
            self.dir.path().join("src/app/api")
        }

        /// Write `contents` to `rel` under the API directory, creating parents.
        pub fn write_handler(&self, rel: &str, contents: &str) -> PathBuf {
            let path = self.api_dir().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
            path
        }

        /// Write a file relative to the project root.
        pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
            let path = self.dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, contents).unwrap();
            path
        }
    }
}

pub mod loader {
    use async_trait::async_trait;
    use biniserve::dispatcher::Handler;
    use biniserve::resolver::{HandlerSource, LoadError, LoadStrategy, ModuleLoader};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves in-process handlers keyed by route name instead of running a
    /// script runtime. The handler file must still exist on disk.
    #[derive(Default)]
    pub struct StubLoader {
        handlers: HashMap<String, Arc<dyn Handler>>,
        loads: AtomicUsize,
    }

    impl StubLoader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, route: &str, handler: impl Handler + 'static) -> Self {
            self.handlers.insert(route.to_string(), Arc::new(handler));
            self
        }

        pub fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ModuleLoader for StubLoader {
        async fn load(&self, source: &HandlerSource, _strategy: LoadStrategy) -> Result<Arc<dyn Handler>, LoadError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.handlers
                .get(source.route.as_str())
                .map(Arc::clone)
                .ok_or(LoadError::InvalidExport)
        }
    }
}

pub mod http {
    use biniserve::server::{AppContext, HttpServer, ServerHandle};
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// A server on an ephemeral port, shut down explicitly with [`TestServer::stop`].
    pub struct TestServer {
        handle: ServerHandle,
    }

    impl TestServer {
        pub async fn start(ctx: AppContext) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let handle = HttpServer::new(Arc::new(ctx)).start(listener).unwrap();
            handle.wait_ready().await.unwrap();
            Self { handle }
        }

        pub fn addr(&self) -> SocketAddr {
            self.handle.addr()
        }

        pub fn context(&self) -> &Arc<AppContext> {
            self.handle.context()
        }

        pub async fn request(&self, raw: &str) -> Response {
            send_request(self.addr(), raw.as_bytes()).await
        }

        pub async fn get(&self, path: &str) -> Response {
            self.request(&format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"))
                .await
        }

        pub async fn post(&self, path: &str, content_type: &str, body: &str) -> Response {
            self.request(&format!(
                "POST {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            ))
            .await
        }

        pub async fn stop(self) -> bool {
            self.handle.shutdown(Duration::from_secs(2)).await
        }
    }

    #[derive(Debug)]
    pub struct Response {
        pub status: u16,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl Response {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        }

        pub fn json(&self) -> Value {
            serde_json::from_str(&self.body).unwrap_or(Value::Null)
        }
    }

    pub async fn send_request(addr: SocketAddr, raw: &[u8]) -> Response {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut buf))
            .await
            .expect("response timed out")
            .unwrap();
        parse_response(&String::from_utf8_lossy(&buf))
    }

    pub fn parse_response(resp: &str) -> Response {
        let (head, body) = resp.split_once("\r\n\r\n").unwrap_or((resp, ""));
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .unwrap_or("0")
            .parse()
            .unwrap();
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        Response {
            status,
            headers,
            body: body.to_string(),
        }
    }
}

/// Whether a `node` binary is on `PATH`.
pub fn node_available() -> bool {
    std::process::Command::new("node")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
