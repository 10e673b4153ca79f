//! # Configuration Module
//!
//! Project configuration for the dispatch engine, loaded from an optional
//! `bini.toml` in the project root and then overridden by environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `BINI_ENV` / `NODE_ENV` | `development` or `production` |
//! | `PORT` | Listen port (default 3000, or 3001 in development) |
//! | `BINI_HOST` | Bind address (default `0.0.0.0`) |
//! | `BINI_SCRIPT_RUNTIME` | Program that executes handler modules (default `node`) |
//! | `RATE_LIMIT` | Requests admitted per client per window (default 100) |
//!
//! ## Example `bini.toml`
//!
//! ```toml
//! [api]
//! dir = "src/app/api"
//! timeout_secs = 30
//! strategies = ["direct", "transpile"]
//!
//! [server]
//! port = 3000
//! dist_dir = "dist"
//!
//! [rate_limit]
//! max_requests = 100
//! window_secs = 60
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::resolver::LoadStrategy;

/// Name of the optional project configuration file.
pub const CONFIG_FILE: &str = "bini.toml";

const RUNTIME_GRACE: Duration = Duration::from_secs(5);

/// Execution mode. Development favours freshness and verbose errors,
/// production favours caching and terse errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Development,
    #[default]
    Production,
}

impl Mode {
    pub fn is_dev(self) -> bool {
        matches!(self, Mode::Development)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }

    /// Read `BINI_ENV`, falling back to `NODE_ENV`.
    pub fn from_env() -> Option<Self> {
        env::var("BINI_ENV")
            .or_else(|_| env::var("NODE_ENV"))
            .ok()
            .and_then(|v| v.parse().ok())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler resolution and invocation settings (`[api]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Directory holding handler modules, relative to the project root.
    pub dir: PathBuf,
    /// Per-invocation deadline.
    pub timeout_secs: u64,
    /// Largest accepted request body in bytes.
    pub body_limit: usize,
    /// Cache lifetime for resolved handlers in production.
    pub cache_ttl_secs: u64,
    /// Cache lifetime in development; entries are also checked against the file on disk.
    pub dev_cache_ttl_ms: u64,
    /// Load strategies, tried in order for typed sources.
    pub strategies: Vec<LoadStrategy>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("src/app/api"),
            timeout_secs: 30,
            body_limit: 1024 * 1024,
            cache_ttl_secs: 300,
            dev_cache_ttl_ms: 500,
            strategies: vec![LoadStrategy::Direct, LoadStrategy::Transpile],
        }
    }
}

/// HTTP front door settings (`[server]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// `None` selects the mode default.
    pub port: Option<u16>,
    pub dist_dir: PathBuf,
    /// Honour `X-Forwarded-For` and friends when deriving the client address.
    pub trust_proxy: bool,
    pub shutdown_timeout_secs: u64,
    /// How many ports above the configured one to try when it is taken.
    pub port_scan_span: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            dist_dir: PathBuf::from("dist"),
            trust_proxy: true,
            shutdown_timeout_secs: 30,
            port_scan_span: 1000,
        }
    }
}

/// Sliding window limiter settings (`[rate_limit]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_secs: u64,
    pub sweep_interval_secs: u64,
    /// Client identifiers that bypass the limiter.
    pub allow_list: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
            sweep_interval_secs: 60,
            allow_list: Vec::new(),
        }
    }
}

/// Script runtime used to execute handler modules (`[runtime]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptRuntimeConfig {
    pub program: String,
    /// Arguments placed before the embedded shim source.
    pub args: Vec<String>,
}

impl Default for ScriptRuntimeConfig {
    fn default() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["--input-type=module".to_string(), "--eval".to_string()],
        }
    }
}

/// Emitter settings (`[build]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Platforms built when `build-api` is run without `--target`.
    pub targets: Vec<String>,
    /// Overrides the project name used in `wrangler.toml`.
    pub project_name: Option<String>,
}

/// Complete project configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BiniConfig {
    /// Project root; every relative path below resolves against it.
    #[serde(skip)]
    pub root: PathBuf,
    /// Chosen by the command being run and `BINI_ENV`, never by the file.
    #[serde(skip)]
    pub mode: Mode,
    pub api: ApiConfig,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub runtime: ScriptRuntimeConfig,
    pub build: BuildConfig,
}

impl Default for BiniConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            mode: Mode::Production,
            api: ApiConfig::default(),
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            runtime: ScriptRuntimeConfig::default(),
            build: BuildConfig::default(),
        }
    }
}

impl BiniConfig {
    /// Load `bini.toml` from `root` when present, then apply environment overrides.
    ///
    /// `mode` is the mode implied by the command being run; `BINI_ENV` wins over it.
    pub fn load(root: &Path, mode: Mode) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        let mut config = if path.is_file() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Self::from_toml(&text).with_context(|| format!("invalid {}", path.display()))?
        } else {
            Self::default()
        };
        config.root = root.to_path_buf();
        config.mode = mode;
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a configuration document without touching the environment.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: BiniConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(mode) = Mode::from_env() {
            self.mode = mode;
        }
        if let Ok(port) = env::var("PORT") {
            let port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got '{port}'"))?;
            self.server.port = Some(port);
        }
        if let Ok(host) = env::var("BINI_HOST") {
            self.server.host = host;
        }
        if let Ok(program) = env::var("BINI_SCRIPT_RUNTIME") {
            self.runtime.program = program;
        }
        if let Ok(limit) = env::var("RATE_LIMIT") {
            self.rate_limit.max_requests = limit
                .trim()
                .parse()
                .with_context(|| format!("RATE_LIMIT must be a positive integer, got '{limit}'"))?;
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.api.timeout_secs > 0, "api.timeout_secs must be positive");
        anyhow::ensure!(
            !self.api.strategies.is_empty(),
            "api.strategies must name at least one load strategy"
        );
        anyhow::ensure!(
            self.rate_limit.max_requests > 0,
            "rate_limit.max_requests must be positive"
        );
        anyhow::ensure!(
            self.rate_limit.window_secs > 0,
            "rate_limit.window_secs must be positive"
        );
        Ok(())
    }

    pub fn api_dir(&self) -> PathBuf {
        self.root.join(&self.api.dir)
    }

    pub fn dist_dir(&self) -> PathBuf {
        self.root.join(&self.server.dist_dir)
    }

    pub fn port(&self) -> u16 {
        self.server.port.unwrap_or(match self.mode {
            Mode::Development => 3001,
            Mode::Production => 3000,
        })
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Longest a script runtime process may live: the handler deadline plus
    /// a short grace for output written after a late commit.
    pub fn runtime_lifetime(&self) -> Duration {
        self.handler_timeout() + RUNTIME_GRACE
    }

    /// Cache lifetime for the current mode.
    pub fn cache_ttl(&self) -> Duration {
        match self.mode {
            Mode::Development => Duration::from_millis(self.api.dev_cache_ttl_ms),
            Mode::Production => Duration::from_secs(self.api.cache_ttl_secs),
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}
