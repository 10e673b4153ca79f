use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, error, warn};

use crate::adapter::{ApiResponse, CanonicalRequest, ErrorBody, ResponseBuilder};
use crate::config::Mode;
use crate::route::RouteName;

/// Default per-invocation deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure raised by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    /// Stack trace, when the handler runtime has one.
    pub stack: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// A resolved API handler.
///
/// The handler may emit through `res`, return a value, or both; an emit
/// always wins over the return value.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        req: CanonicalRequest,
        res: ResponseBuilder,
    ) -> Result<Option<Value>, HandlerError>;
}

/// [`Handler`] backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`Handler`].
///
/// ```rust
/// use biniserve::dispatcher::{handler_fn, Handler};
/// use serde_json::json;
///
/// let hello = handler_fn(|req, _res| async move {
///     Ok(Some(json!({ "method": req.method })))
/// });
/// # let _: &dyn Handler = &hello;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(CanonicalRequest, ResponseBuilder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(CanonicalRequest, ResponseBuilder) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Value>, HandlerError>> + Send + 'static,
{
    async fn call(
        &self,
        req: CanonicalRequest,
        res: ResponseBuilder,
    ) -> Result<Option<Value>, HandlerError> {
        (self.f)(req, res).await
    }
}

/// Why a dispatch did not produce a handler response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Handler timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("handler failed: {0}")]
    Handler(HandlerError),
}

impl DispatchError {
    /// Error response for this failure. Stacks are only exposed in development.
    pub fn to_response(&self, mode: Mode) -> ApiResponse {
        match self {
            DispatchError::Timeout(_) => ApiResponse::error(
                504,
                ErrorBody::new("Request timeout").with_message(self.to_string()),
            ),
            DispatchError::Handler(err) => ApiResponse::error(
                500,
                ErrorBody::new("Internal Server Error")
                    .with_message(err.message.clone())
                    .with_stack(if mode.is_dev() { err.stack.clone() } else { None }),
            ),
        }
    }
}

/// Invokes handlers under a deadline.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    timeout: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Dispatcher {
    /// A dispatcher that answers 504 once a handler has run for `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `handler` against `req`.
    ///
    /// Resolves as soon as the handler commits a response, returns, fails, or
    /// the deadline passes, whichever comes first. The handler task is not
    /// cancelled: after a commit or a timeout it keeps running detached and
    /// whatever it does afterwards is discarded.
    pub async fn invoke(
        &self,
        route: &RouteName,
        handler: Arc<dyn Handler>,
        req: CanonicalRequest,
    ) -> Result<ApiResponse, DispatchError> {
        let started = Instant::now();
        let res = ResponseBuilder::new();
        let mut task = tokio::spawn({
            let res = res.clone();
            async move { handler.call(req, res).await }
        });
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            biased;
            joined = &mut task => flatten(joined),
            _ = res.committed() => {
                debug!(%route, "response committed before handler returned");
                return Ok(res.snapshot());
            }
            _ = &mut deadline => {
                warn!(%route, timeout_ms = self.timeout.as_millis() as u64, "handler timed out");
                return Err(DispatchError::Timeout(self.timeout));
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(returned) => {
                debug!(%route, elapsed_ms, "handler completed");
                Ok(res.finish(returned))
            }
            // A failure after an explicit emit does not replace what was emitted.
            Err(err) if res.is_sent() => {
                warn!(%route, error = %err, "handler failed after sending a response");
                Ok(res.snapshot())
            }
            Err(err) => {
                error!(%route, elapsed_ms, error = %err, "handler failed");
                Err(DispatchError::Handler(err))
            }
        }
    }
}

fn flatten(
    joined: Result<Result<Option<Value>, HandlerError>, JoinError>,
) -> Result<Option<Value>, HandlerError> {
    match joined {
        Ok(result) => result,
        Err(join_err) if join_err.is_panic() => {
            let payload = join_err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(HandlerError::new(message))
        }
        Err(join_err) => Err(HandlerError::new(join_err.to_string())),
    }
}
