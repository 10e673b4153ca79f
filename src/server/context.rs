use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adapter::AdapterOptions;
use crate::config::{BiniConfig, Mode};
use crate::dispatcher::Dispatcher;
use crate::hot_reload::ApiUpdate;
use crate::middleware::{CorsMiddleware, MetricsMiddleware, Middleware};
use crate::rate_limit::RateLimiter;
use crate::resolver::{Resolver, ResolverOptions};
use crate::runtime::{ScriptLoader, ScriptRuntime};
use crate::static_files::StaticFiles;

/// Default request body ceiling.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// How the server turns a raw API request into a canonical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontDoor {
    /// The adapter parses the raw body; malformed JSON is
    /// `400 {"error":"Invalid JSON"}`.
    DevStream,
    /// A pre-parse layer answers malformed JSON with
    /// `400 {"statusCode":400,"error":"Bad Request","message":...}` and hands
    /// the adapter an already parsed body.
    Production,
}

impl FrontDoor {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Development => FrontDoor::DevStream,
            Mode::Production => FrontDoor::Production,
        }
    }
}

/// Everything one server instance owns. Nothing here is process global, so
/// several servers (e.g. in tests) never share caches or rate-limit windows.
pub struct AppContext {
    pub mode: Mode,
    pub front_door: FrontDoor,
    pub resolver: Arc<Resolver>,
    pub dispatcher: Dispatcher,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsMiddleware>,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub static_files: Option<StaticFiles>,
    pub events: broadcast::Sender<ApiUpdate>,
    pub adapter: AdapterOptions,
    pub body_limit: usize,
    pub runtime_version: Option<String>,
    pub started: Instant,
}

impl AppContext {
    /// Context with default limits around `resolver`. Mode and front door
    /// follow the resolver's mode; static files are off until set.
    pub fn new(resolver: Arc<Resolver>) -> Self {
        let mode = resolver.mode();
        let metrics = Arc::new(MetricsMiddleware::new());
        let (events, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            mode,
            front_door: FrontDoor::for_mode(mode),
            resolver,
            dispatcher: Dispatcher::default(),
            limiter: Arc::new(RateLimiter::default()),
            middlewares: vec![
                Arc::clone(&metrics) as Arc<dyn Middleware>,
                Arc::new(CorsMiddleware::default()),
            ],
            metrics,
            static_files: None,
            events,
            adapter: AdapterOptions::default(),
            body_limit: DEFAULT_BODY_LIMIT,
            runtime_version: None,
            started: Instant::now(),
        }
    }

    /// Build the full context for a project: script runtime, resolver,
    /// limiter and, when `serve_static`, the `dist/` file server.
    pub async fn from_config(config: &BiniConfig, serve_static: bool) -> Result<Self> {
        let runtime = Arc::new(
            ScriptRuntime::new(&config.runtime, config.mode).with_max_lifetime(config.runtime_lifetime()),
        );
        let runtime_version = runtime.version().await;
        match &runtime_version {
            Some(v) => debug!(program = runtime.program(), version = %v, "script runtime found"),
            None => info!(
                program = runtime.program(),
                "script runtime not found; API handlers will fail to load"
            ),
        }

        let options = ResolverOptions {
            mode: config.mode,
            ttl: config.cache_ttl(),
            strategies: config.api.strategies.clone(),
        };
        let resolver = Arc::new(Resolver::new(
            config.api_dir(),
            Arc::new(ScriptLoader::new(runtime)),
            options,
        ));

        let limiter = RateLimiter::new(config.rate_limit.max_requests, config.rate_window())
            .with_allow_list(config.rate_limit.allow_list.iter().cloned());

        let static_files = if serve_static {
            let dist = validate_dist(&config.dist_dir())?;
            Some(StaticFiles::new(dist, config.mode))
        } else {
            None
        };

        let mut ctx = Self::new(resolver)
            .with_dispatcher(Dispatcher::new(config.handler_timeout()))
            .with_rate_limiter(limiter)
            .with_body_limit(config.api.body_limit)
            .with_adapter(AdapterOptions {
                trust_proxy: config.server.trust_proxy,
            });
        ctx.static_files = static_files;
        ctx.runtime_version = runtime_version;
        Ok(ctx)
    }

    pub fn with_front_door(mut self, front_door: FrontDoor) -> Self {
        self.front_door = front_door;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Arc::new(limiter);
        self
    }

    pub fn with_static_files(mut self, files: StaticFiles) -> Self {
        self.static_files = Some(files);
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    pub fn with_adapter(mut self, adapter: AdapterOptions) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApiUpdate> {
        self.events.subscribe()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Periodically drop rate-limit windows of clients that went quiet.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let limiter = Arc::clone(&self.limiter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                limiter.sweep_idle(Instant::now());
            }
        })
    }
}

/// The build output directory, which must exist before a production start.
pub fn validate_dist(dist: &std::path::Path) -> Result<std::path::PathBuf> {
    let resolved = std::path::absolute(dist)
        .with_context(|| format!("cannot resolve {}", dist.display()))?;
    if !resolved.exists() {
        anyhow::bail!(
            "Build directory not found: {}\nRun: npm run build",
            resolved.display()
        );
    }
    if !resolved.is_dir() {
        anyhow::bail!("Build path is not a directory: {}", resolved.display());
    }
    Ok(resolved)
}
