use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::adapter::{adapt, AdapterOptions, FetchRequest, NativeRequest, PlatformEvent};
use crate::config::{BiniConfig, Mode};
use crate::dispatcher::Dispatcher;
use crate::emit::{discover, Emitter, Platform};
use crate::hot_reload::watch_api_dir;
use crate::logging::{init_logging, LogConfig};
use crate::resolver::{Resolver, ResolverOptions};
use crate::route::{HandlerExtension, RouteName};
use crate::runtime::{ScriptLoader, ScriptRuntime};
use crate::server::{find_open_port, shutdown_signal, AppContext, HttpServer};

/// Command-line interface for Bini.js API handlers
#[derive(Parser)]
#[command(name = "bini")]
#[command(about = "Serve, run and package file-routed API handlers", long_about = None)]
pub struct Cli {
    /// Project root holding bini.toml and the API directory
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Development server: fresh handlers on every change, verbose errors
    Dev {
        /// Port to listen on (default 3001)
        #[arg(short, long)]
        port: Option<u16>,

        /// Log every request and reload at debug level
        #[arg(short, long, default_value_t = false)]
        verbose: bool,
    },
    /// Production server over the build output
    Start {
        /// Port to listen on (default 3000, or $PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Emit one deployable function per API route
    BuildApi {
        /// Comma-separated targets: vercel, netlify, cloudflare, verbs
        #[arg(short, long)]
        target: Option<String>,

        /// Output root (default: project root)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List API routes as {path, file} records
    Routes,
    /// Run one handler locally and print the platform-shaped result
    Invoke {
        /// Route name (`users/list`) or request path (`/api/users/list`)
        route: String,

        /// Serverless event JSON file; other request flags are ignored
        #[arg(short, long)]
        event: Option<PathBuf>,

        /// HTTP method
        #[arg(short, long, default_value = "GET")]
        method: String,

        /// Request body
        #[arg(short, long)]
        data: Option<String>,

        /// Request header as `name:value` (repeatable)
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
    },
}

/// Parse a `name:value` header argument.
pub fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected name:value, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{s}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse the process arguments and run the selected command.
pub async fn run_cli() -> Result<()> {
    run(Cli::parse()).await
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Dev { port, verbose } => {
            let mut config = BiniConfig::load(&cli.root, Mode::Development)?;
            if port.is_some() {
                config.server.port = port;
            }
            let mut log = LogConfig::from_env(config.mode);
            if verbose {
                log.log_level = "debug".to_string();
            }
            let _guard = init_logging(&log)?;
            serve(config, false, true).await
        }
        Commands::Start { port } => {
            let mut config = BiniConfig::load(&cli.root, Mode::Production)?;
            if port.is_some() {
                config.server.port = port;
            }
            let _guard = init_logging(&LogConfig::from_env(config.mode))?;
            serve(config, true, false).await
        }
        Commands::BuildApi { target, out } => {
            let config = BiniConfig::load(&cli.root, Mode::Production)?;
            let _guard = init_logging(&LogConfig::from_env(config.mode))?;
            build_api(&config, target.as_deref(), out)
        }
        Commands::Routes => {
            let config = BiniConfig::load(&cli.root, Mode::Production)?;
            let records = list_routes(&config)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Commands::Invoke {
            route,
            event,
            method,
            data,
            headers,
        } => {
            let config = BiniConfig::load(&cli.root, Mode::Development)?;
            let _guard = init_logging(&LogConfig::from_env(config.mode))?;
            let native = match event {
                Some(path) => NativeRequest::PlatformEvent(read_event(&path)?),
                None => NativeRequest::Fetch(fetch_request(&route, &method, data, &headers)?),
            };
            let result = invoke(&config, &route, native).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}

async fn serve(config: BiniConfig, serve_static: bool, watch: bool) -> Result<()> {
    let ctx = Arc::new(AppContext::from_config(&config, serve_static).await?);

    let _watcher = if watch {
        let api_dir = config.api_dir();
        if api_dir.is_dir() {
            Some(
                watch_api_dir(&api_dir, Arc::clone(&ctx.resolver), ctx.events.clone())
                    .with_context(|| format!("cannot watch {}", api_dir.display()))?,
            )
        } else {
            warn!(dir = %api_dir.display(), "API directory missing; hot reload disabled");
            None
        }
    } else {
        None
    };

    let listener = find_open_port(&config.server.host, config.port(), config.server.port_scan_span)
        .await
        .with_context(|| format!("cannot bind {}:{}", config.server.host, config.port()))?;
    let handle = HttpServer::new(Arc::clone(&ctx))
        .start(listener)?
        .with_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)));

    let port = handle.addr().port();
    let title = if config.mode.is_dev() {
        "Bini.js dev server"
    } else {
        "Bini.js production server"
    };
    println!("🚀 {title} ready");
    println!("  ➜ Local:   http://localhost:{port}/");
    println!("  ➜ API:     http://localhost:{port}/api/");
    println!("  ➜ Health:  http://localhost:{port}/health");
    if let Some(files) = &ctx.static_files {
        println!("  ➜ Serving: {}", files.root().display());
    }
    if watch {
        println!("  ➜ Watching {} for changes", config.api_dir().display());
    }

    shutdown_signal().await;
    println!("\n🛑 Shutting down...");
    if handle.shutdown(config.shutdown_timeout()).await {
        println!("✅ Server closed");
    } else {
        println!("⚠️  Forced shutdown with requests still in flight");
    }
    Ok(())
}

fn build_api(config: &BiniConfig, target: Option<&str>, out: Option<PathBuf>) -> Result<()> {
    let targets = match target {
        Some(list) => Platform::parse_list(list).map_err(|e| anyhow!(e))?,
        None if config.build.targets.is_empty() => Platform::ALL.to_vec(),
        None => Platform::parse_list(&config.build.targets.join(",")).map_err(|e| anyhow!(e))?,
    };
    let out = out.unwrap_or_else(|| config.root.clone());
    let mut emitter = Emitter::new(config.api_dir(), &out);
    if let Some(name) = &config.build.project_name {
        emitter = emitter.with_project_name(name.clone());
    }

    println!("🔨 Building API functions for {}", join_targets(&targets));
    let report = emitter.build(&targets)?;
    for path in &report.written {
        println!("  ✅ {}", display_relative(path, &out));
    }
    if !report.unchanged.is_empty() {
        println!("  ⏭️  {} file(s) unchanged", report.unchanged.len());
    }
    for failure in &report.failures {
        let platform = failure.platform.map(Platform::as_str).unwrap_or("all");
        println!("  ❌ {} [{}]: {}", failure.route, platform, failure.error);
    }
    if !report.is_success() {
        bail!("{} route build(s) failed", report.failures.len());
    }
    println!("✨ {} route(s) built", report.routes);
    Ok(())
}

fn join_targets(targets: &[Platform]) -> String {
    targets.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base).unwrap_or(path).display().to_string()
}

fn list_routes(config: &BiniConfig) -> Result<Vec<crate::emit::RouteRecord>> {
    let routes = discover(&config.api_dir(), &HandlerExtension::EMITTABLE)?;
    Ok(routes.iter().map(|r| r.record(&config.root)).collect())
}

fn route_name(route: &str) -> Result<RouteName> {
    let parsed = if route.starts_with('/') {
        RouteName::from_request_path(route)
    } else {
        RouteName::parse(route)
    };
    parsed.with_context(|| format!("invalid route '{route}'"))
}

fn read_event(path: &Path) -> Result<PlatformEvent> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid event JSON in {}", path.display()))
}

fn fetch_request(route: &str, method: &str, data: Option<String>, headers: &[(String, String)]) -> Result<FetchRequest> {
    let route = route_name(route)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{method}'"))?;
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).with_context(|| format!("invalid header name '{name}'"))?,
            HeaderValue::from_str(value).with_context(|| format!("invalid value for header '{name}'"))?,
        );
    }
    if data.is_some() && !map.contains_key(http::header::CONTENT_TYPE) {
        map.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    Ok(FetchRequest {
        method,
        url: format!("http://localhost{}", route.url_path()),
        headers: map,
        body: data.map(Bytes::from),
    })
}

/// Resolve `route` under the project's API directory, run it once and
/// return `{statusCode, headers, body}`.
async fn invoke(config: &BiniConfig, route: &str, native: NativeRequest) -> Result<Value> {
    let route = route_name(route)?;
    let runtime = Arc::new(
        ScriptRuntime::new(&config.runtime, config.mode).with_max_lifetime(config.runtime_lifetime()),
    );
    let resolver = Resolver::new(
        config.api_dir(),
        Arc::new(ScriptLoader::new(runtime)),
        ResolverOptions {
            mode: config.mode,
            ttl: config.cache_ttl(),
            strategies: config.api.strategies.clone(),
        },
    );
    let module = match resolver.resolve(&route).await {
        Ok(module) => module,
        Err(e) => return Ok(platform_shape(e.to_response(route.as_str(), config.mode))),
    };
    let request = adapt(
        native,
        &AdapterOptions {
            trust_proxy: config.server.trust_proxy,
        },
    )?;
    let res = match Dispatcher::new(config.handler_timeout())
        .invoke(&route, module.handler(), request)
        .await
    {
        Ok(res) => res,
        Err(e) => e.to_response(config.mode),
    };
    Ok(platform_shape(res))
}

fn platform_shape(res: crate::adapter::ApiResponse) -> Value {
    let headers: serde_json::Map<String, Value> = res
        .headers
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.clone())))
        .collect();
    json!({
        "statusCode": res.status,
        "headers": headers,
        "body": res.body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_request_defaults_json_content_type() {
        let req = fetch_request("/api/users/list", "post", Some("{}".into()), &[]).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.url, "http://localhost/api/users/list");
        assert_eq!(req.headers["content-type"], "application/json");
    }

    #[test]
    fn test_fetch_request_keeps_explicit_content_type() {
        let headers = vec![("Content-Type".to_string(), "text/plain".to_string())];
        let req = fetch_request("hello", "GET", Some("hi".into()), &headers).unwrap();
        assert_eq!(req.headers["content-type"], "text/plain");
        assert_eq!(req.body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_route_name_rejects_traversal() {
        assert!(route_name("../etc/passwd").is_err());
        assert!(route_name("/not-api/x").is_err());
    }

    #[test]
    fn test_platform_shape() {
        let mut res = crate::adapter::ApiResponse::new(201);
        res.set_header("X-Test", "1".to_string());
        res.body = "ok".to_string();
        let shaped = platform_shape(res);
        assert_eq!(shaped["statusCode"], 201);
        assert_eq!(shaped["headers"]["X-Test"], "1");
        assert_eq!(shaped["body"], "ok");
    }
}
