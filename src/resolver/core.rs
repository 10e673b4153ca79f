use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::HandlerCache;
use super::loader::{HandlerSource, LoadError, LoadStrategy, ModuleLoader};
use crate::adapter::{ApiResponse, ErrorBody};
use crate::config::Mode;
use crate::dispatcher::Handler;
use crate::route::{HandlerExtension, RouteError, RouteName, SourceKind};

/// Cheap identity of a handler file, used to detect edits in development.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFingerprint {
    pub modified: Option<SystemTime>,
    pub len: u64,
    /// Hex SHA-256 of the file contents.
    pub digest: String,
}

impl SourceFingerprint {
    pub fn of(meta: &std::fs::Metadata, contents: &[u8]) -> Self {
        Self {
            modified: meta.modified().ok(),
            len: meta.len(),
            digest: digest_hex(contents),
        }
    }

    /// Whether the file at `path` still has these contents. Size and mtime
    /// are compared first; the digest settles touched-but-unchanged files.
    pub async fn matches_disk(&self, path: &Path) -> bool {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        if meta.len() != self.len {
            return false;
        }
        if meta.modified().ok() == self.modified {
            return true;
        }
        match tokio::fs::read(path).await {
            Ok(contents) => digest_hex(&contents) == self.digest,
            Err(_) => false,
        }
    }
}

fn digest_hex(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

/// A loaded handler together with where it came from.
pub struct HandlerModule {
    pub route: RouteName,
    pub path: PathBuf,
    pub extension: HandlerExtension,
    pub strategy: LoadStrategy,
    pub fingerprint: SourceFingerprint,
    pub loaded_at: Instant,
    handler: Arc<dyn Handler>,
}

impl HandlerModule {
    pub fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }
}

impl fmt::Debug for HandlerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerModule")
            .field("route", &self.route)
            .field("path", &self.path)
            .field("strategy", &self.strategy)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

/// Why a route could not be resolved to a handler.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidRoute(#[from] RouteError),
    #[error("API route not found: {route}")]
    NotFound { route: RouteName },
    #[error("Invalid API handler '{route}' ({}) - export a default function", path.display())]
    InvalidHandler { route: RouteName, path: PathBuf },
    #[error("Failed to load API handler '{route}' ({}): {reason}", path.display())]
    Configuration {
        route: RouteName,
        path: PathBuf,
        reason: String,
    },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResolveError {
    /// Error response for this failure on request path `path`.
    ///
    /// Development 404s also list the handler extensions that were tried.
    pub fn to_response(&self, path: &str, mode: Mode) -> ApiResponse {
        match self {
            ResolveError::InvalidRoute(_) | ResolveError::NotFound { .. } => {
                let body = ErrorBody::new("API route not found").with_path(path);
                let body = match mode {
                    Mode::Development => body.with_available_extensions(HandlerExtension::priority_list()),
                    Mode::Production => body,
                };
                ApiResponse::error(404, body)
            }
            ResolveError::InvalidHandler { .. }
            | ResolveError::Configuration { .. }
            | ResolveError::Io { .. } => ApiResponse::error(
                500,
                ErrorBody::new("Internal Server Error").with_message(self.to_string()),
            ),
        }
    }
}

/// Resolution settings.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub mode: Mode,
    pub ttl: Duration,
    /// Strategies tried, in order, for typed sources. Plain scripts always load directly.
    pub strategies: Vec<LoadStrategy>,
}

impl ResolverOptions {
    pub fn production() -> Self {
        Self {
            mode: Mode::Production,
            ttl: Duration::from_secs(300),
            strategies: vec![LoadStrategy::Direct, LoadStrategy::Transpile],
        }
    }

    pub fn development() -> Self {
        Self {
            mode: Mode::Development,
            ttl: Duration::from_millis(500),
            ..Self::production()
        }
    }
}

/// Maps route names to loaded handlers, with caching.
pub struct Resolver {
    api_dir: PathBuf,
    loader: Arc<dyn ModuleLoader>,
    options: ResolverOptions,
    cache: HandlerCache,
}

impl Resolver {
    /// Create a resolver over `api_dir`.
    ///
    /// Nothing is read until the first [`Resolver::resolve`]; a missing
    /// directory surfaces then as a not-found route.
    ///
    /// # Arguments
    ///
    /// * `api_dir` - Directory holding handler files, e.g. `src/app/api`
    /// * `loader` - Turns a handler source into a callable [`Handler`]
    /// * `options` - Mode, cache TTL and the load strategies for typed sources
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use biniserve::config::{Mode, ScriptRuntimeConfig};
    /// use biniserve::resolver::{Resolver, ResolverOptions};
    /// use biniserve::route::RouteName;
    /// use biniserve::runtime::{ScriptLoader, ScriptRuntime};
    /// use std::sync::Arc;
    ///
    /// let runtime = Arc::new(ScriptRuntime::new(&ScriptRuntimeConfig::default(), Mode::Development));
    /// let resolver = Resolver::new(
    ///     "src/app/api",
    ///     Arc::new(ScriptLoader::new(runtime)),
    ///     ResolverOptions::development(),
    /// );
    /// let module = resolver.resolve(&RouteName::parse("users/list")?).await?;
    /// ```
    pub fn new(api_dir: impl Into<PathBuf>, loader: Arc<dyn ModuleLoader>, options: ResolverOptions) -> Self {
        Self {
            api_dir: api_dir.into(),
            loader,
            options,
            cache: HandlerCache::new(),
        }
    }

    pub fn api_dir(&self) -> &Path {
        &self.api_dir
    }

    pub fn mode(&self) -> Mode {
        self.options.mode
    }

    /// Resolve `route` to a handler module.
    ///
    /// Within the TTL a cached module is returned without touching the disk
    /// in production; in development the cached file is also checked for edits.
    pub async fn resolve(&self, route: &RouteName) -> Result<Arc<HandlerModule>, ResolveError> {
        let now = Instant::now();
        if let Some(module) = self.cache.get_fresh(route, now, self.options.ttl) {
            if !self.options.mode.is_dev() || module.fingerprint.matches_disk(&module.path).await {
                return Ok(module);
            }
            debug!(%route, "handler changed on disk; reloading");
        }

        let (extension, path) = self.locate(route).await?;
        let contents = tokio::fs::read(&path).await.map_err(|source| ResolveError::Io {
            path: path.clone(),
            source,
        })?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|source| ResolveError::Io {
                path: path.clone(),
                source,
            })?;
        let fingerprint = SourceFingerprint::of(&meta, &contents);
        let text = String::from_utf8(contents).map_err(|e| ResolveError::Configuration {
            route: route.clone(),
            path: path.clone(),
            reason: format!("source is not valid UTF-8: {e}"),
        })?;

        let source = HandlerSource {
            route: route.clone(),
            path,
            extension,
            text,
        };
        let (handler, strategy) = self.load(&source).await?;

        info!(%route, path = %source.path.display(), %strategy, "loaded API handler");
        let module = Arc::new(HandlerModule {
            route: source.route,
            path: source.path,
            extension,
            strategy,
            fingerprint,
            loaded_at: now,
            handler,
        });
        self.cache.insert(Arc::clone(&module), now);
        Ok(module)
    }

    /// First candidate file, in extension priority order, that exists.
    async fn locate(&self, route: &RouteName) -> Result<(HandlerExtension, PathBuf), ResolveError> {
        for (ext, path) in route.candidates(&self.api_dir) {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.is_file() {
                    return Ok((ext, path));
                }
            }
        }
        Err(ResolveError::NotFound {
            route: route.clone(),
        })
    }

    fn strategies_for(&self, source: &HandlerSource) -> Vec<LoadStrategy> {
        match source.kind() {
            SourceKind::Script => vec![LoadStrategy::Direct],
            SourceKind::Typed => self.options.strategies.clone(),
        }
    }

    async fn load(
        &self,
        source: &HandlerSource,
    ) -> Result<(Arc<dyn Handler>, LoadStrategy), ResolveError> {
        let mut failures = Vec::new();
        for strategy in self.strategies_for(source) {
            match self.loader.load(source, strategy).await {
                Ok(handler) => return Ok((handler, strategy)),
                Err(LoadError::InvalidExport) => {
                    return Err(ResolveError::InvalidHandler {
                        route: source.route.clone(),
                        path: source.path.clone(),
                    })
                }
                Err(err) => {
                    debug!(route = %source.route, %strategy, error = %err, "load strategy failed");
                    failures.push(format!("{strategy}: {err}"));
                }
            }
        }
        let mut reason = failures.join("; ");
        if source.kind() == SourceKind::Typed {
            reason.push_str(
                ". TypeScript handlers need a script runtime that can import .ts files or the transpile strategy",
            );
        }
        warn!(route = %source.route, %reason, "no load strategy succeeded");
        Err(ResolveError::Configuration {
            route: source.route.clone(),
            path: source.path.clone(),
            reason,
        })
    }

    /// Drop cached handlers whose route begins with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.cache.invalidate_prefix(prefix)
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn cached_handlers(&self) -> usize {
        self.cache.len()
    }
}
