use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context::AppContext;
use super::service::AppService;

/// Interval at which shutdown re-checks the in-flight counter.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Bind the first free port in `start..start + span`.
///
/// Only `AddrInUse` moves on to the next port; any other bind error is
/// returned as is.
pub async fn find_open_port(host: &str, start: u16, span: u16) -> io::Result<TcpListener> {
    let end = start.saturating_add(span);
    let mut port = start;
    loop {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                if port != start {
                    info!(requested = start, port, "port in use; using the next free one");
                }
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && port < end && port < u16::MAX => {
                debug!(port, "port in use");
                port += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A hyper HTTP/1 server bound to a listener.
pub struct HttpServer {
    service: AppService,
}

/// Handle to a running server.
pub struct ServerHandle {
    addr: SocketAddr,
    ctx: Arc<AppContext>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl HttpServer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            service: AppService::new(ctx),
        }
    }

    /// Start accepting on `listener`. Returns immediately.
    pub fn start(self, listener: TcpListener) -> io::Result<ServerHandle> {
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::clone(self.service.context());
        let task = tokio::spawn(accept_loop(listener, self.service, shutdown_rx));
        info!(%addr, mode = ctx.mode.as_str(), "server listening");
        Ok(ServerHandle {
            addr,
            ctx,
            shutdown_tx,
            task,
            sweeper: None,
        })
    }
}

async fn accept_loop(listener: TcpListener, service: AppService, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    spawn_connection(stream, remote, service.clone(), shutdown_rx.clone());
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
            _ = shutdown_rx.changed() => {
                debug!("listener closed");
                break;
            }
        }
    }
}

fn spawn_connection(stream: TcpStream, remote: SocketAddr, service: AppService, mut shutdown_rx: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let svc = service_fn(move |req| {
            let service = service.clone();
            async move { Ok::<_, Infallible>(service.handle(req, Some(remote)).await) }
        });
        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), svc);
        tokio::pin!(conn);
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%remote, error = %e, "connection error");
                }
            }
            _ = shutdown_rx.changed() => {
                conn.as_mut().graceful_shutdown();
                if let Err(e) = conn.await {
                    debug!(%remote, error = %e, "connection error during shutdown");
                }
            }
        }
    });
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Attach a rate-limit sweeper that is aborted on shutdown.
    pub fn with_sweeper(mut self, every: Duration) -> Self {
        self.sweeper = Some(self.ctx.spawn_sweeper(every));
        self
    }

    /// Wait until the listener accepts connections.
    pub async fn wait_ready(&self) -> io::Result<()> {
        for _ in 0..50 {
            if TcpStream::connect(self.addr).await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "server not ready"))
    }

    /// Stop accepting, let in-flight requests finish for at most `timeout`,
    /// then drop cached handlers. Returns whether the drain completed.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        info!("shutting down");
        if self.shutdown_tx.send(true).is_err() {
            debug!("accept loop already gone");
        }
        if let Some(sweeper) = &self.sweeper {
            sweeper.abort();
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let drained = loop {
            let active = self.ctx.metrics.active_requests();
            if active == 0 {
                break true;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(active, "shutdown timeout reached with requests still in flight");
                break false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        };
        self.ctx.resolver.clear();
        info!(drained, "server stopped");
        drained
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
