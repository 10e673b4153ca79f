use askama::Template;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::platform::{import_specifier, Platform};
use super::templates::{
    CloudflareTemplate, NetlifyTemplate, RouteModule, VercelTemplate, VerbsTemplate, WorkerIndexTemplate,
    WorkerRoute, WranglerTemplate,
};
use crate::route::{HandlerExtension, RouteName, SourceKind, API_PREFIX};
use crate::transpile::{transpile, TranspileError, TranspileOptions};

/// Project name used when `package.json` has none.
pub const DEFAULT_PROJECT_NAME: &str = "my-bini-app";

/// Compatibility date written to `wrangler.toml`. Fixed so builds are reproducible.
pub const COMPATIBILITY_DATE: &str = "2025-11-28";

/// Cloudflare worker entry point, relative to the output root.
pub const WORKER_ENTRY: &str = "worker/index.js";

pub const WRANGLER_FILE: &str = "wrangler.toml";

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("API directory not found: {}", .0.display())]
    MissingApiDir(PathBuf),
    #[error("failed to scan the API directory: {0}")]
    Discovery(#[from] walkdir::Error),
    #[error("failed to transpile {route}: {source}")]
    Transpile {
        route: RouteName,
        #[source]
        source: TranspileError,
    },
    #[error("failed to render {platform} module for {route}: {source}")]
    Render {
        route: String,
        platform: Platform,
        #[source]
        source: askama::Error,
    },
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is already written for route '{taken_by}'", path.display())]
    Collision { path: PathBuf, taken_by: String },
}

/// A handler file found under the API directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredRoute {
    pub route: RouteName,
    pub path: PathBuf,
    pub extension: HandlerExtension,
}

/// `{path, file}` record as printed by `bini routes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteRecord {
    pub path: String,
    pub file: String,
}

impl DiscoveredRoute {
    pub fn record(&self, root: &Path) -> RouteRecord {
        RouteRecord {
            path: self.route.url_path(),
            file: display_path(root, &self.path),
        }
    }
}

fn display_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    entry.depth() > 0 && (name.starts_with('.') || name == "node_modules")
}

/// Walk `api_dir` for handler files with one of `extensions`. When a route has
/// several files, the extension that comes first in resolution priority wins.
/// Routes come back sorted by name.
pub fn discover(api_dir: &Path, extensions: &[HandlerExtension]) -> Result<Vec<DiscoveredRoute>, EmitError> {
    if !api_dir.is_dir() {
        return Err(EmitError::MissingApiDir(api_dir.to_path_buf()));
    }
    let mut found: BTreeMap<RouteName, DiscoveredRoute> = BTreeMap::new();
    let walker = WalkDir::new(api_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some((route, extension)) = RouteName::from_file(api_dir, entry.path()) else {
            continue;
        };
        if !extensions.contains(&extension) {
            continue;
        }
        let candidate = DiscoveredRoute {
            route: route.clone(),
            path: entry.into_path(),
            extension,
        };
        match found.get(&route) {
            Some(existing) if existing.extension <= extension => {
                debug!(%route, skipped = %candidate.path.display(), "route already provided by a higher-priority file");
            }
            _ => {
                found.insert(route, candidate);
            }
        }
    }
    Ok(found.into_values().collect())
}

/// Handler source ready for embedding: types stripped and the default
/// export rebound to a local binding.
pub fn prepare_source(route: &RouteName, text: &str, kind: SourceKind) -> Result<String, EmitError> {
    transpile(text, kind, &TranspileOptions::entry()).map_err(|source| EmitError::Transpile {
        route: route.clone(),
        source,
    })
}

/// Render one platform module. Output depends only on the inputs.
pub fn render_module(platform: Platform, module: &RouteModule<'_>) -> Result<String, EmitError> {
    let RouteModule {
        route,
        source_file,
        handler_source,
    } = *module;
    let rendered = match platform {
        Platform::Vercel => VercelTemplate {
            route,
            source_file,
            handler_source,
        }
        .render(),
        Platform::Netlify => NetlifyTemplate {
            route,
            source_file,
            handler_source,
            url_path_literal: js_string(&format!("{API_PREFIX}/{route}")),
        }
        .render(),
        Platform::Cloudflare => CloudflareTemplate {
            route,
            source_file,
            handler_source,
        }
        .render(),
        Platform::Verbs => VerbsTemplate {
            route,
            source_file,
            handler_source,
        }
        .render(),
    };
    rendered.map(with_trailing_newline).map_err(|source| EmitError::Render {
        route: route.to_string(),
        platform,
        source,
    })
}

/// Emit the module for one handler source and one platform.
pub fn emit(source: &str, route: &RouteName, kind: SourceKind, platform: Platform) -> Result<String, EmitError> {
    let handler_source = prepare_source(route, source, kind)?;
    let file = format!("{}{}", route.as_str(), match kind {
        SourceKind::Typed => HandlerExtension::Ts.as_str(),
        SourceKind::Script => HandlerExtension::Js.as_str(),
    });
    render_module(
        platform,
        &RouteModule {
            route: route.as_str(),
            source_file: &file,
            handler_source: &handler_source,
        },
    )
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn with_trailing_newline(mut s: String) -> String {
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}

/// `name` from `<root>/package.json`, or [`DEFAULT_PROJECT_NAME`].
pub fn read_project_name(root: &Path) -> String {
    fs::read_to_string(root.join("package.json"))
        .ok()
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .and_then(|pkg| pkg.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .filter(|name| !name.trim().is_empty() && !name.chars().any(char::is_control))
        .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string())
}

pub fn render_worker_index(project_name: &str, routes: &[RouteName]) -> Result<String, EmitError> {
    let worker_dir = Path::new(WORKER_ENTRY).parent().unwrap_or(Path::new(""));
    let routes = routes
        .iter()
        .enumerate()
        .map(|(i, route)| WorkerRoute {
            ident: format!("route{i}_{}", route.ident()),
            import_literal: js_string(&import_specifier(worker_dir, &Platform::Cloudflare.module_path(route))),
            url_literal: js_string(&format!("{API_PREFIX}/{route}")),
        })
        .collect();
    WorkerIndexTemplate { project_name, routes }
        .render()
        .map(with_trailing_newline)
        .map_err(|source| EmitError::Render {
            route: WORKER_ENTRY.to_string(),
            platform: Platform::Cloudflare,
            source,
        })
}

pub fn render_wrangler(project_name: &str) -> Result<String, EmitError> {
    WranglerTemplate {
        project_name_literal: toml::Value::String(project_name.to_string()).to_string(),
        compatibility_date: COMPATIBILITY_DATE,
    }
    .render()
    .map(with_trailing_newline)
    .map_err(|source| EmitError::Render {
        route: WRANGLER_FILE.to_string(),
        platform: Platform::Cloudflare,
        source,
    })
}

/// Write `contents` to `path` unless the file already holds exactly that.
/// Returns whether the file was written.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<bool, EmitError> {
    let io_err = |source| EmitError::Io {
        path: path.to_path_buf(),
        source,
    };
    if fs::read(path).is_ok_and(|existing| existing == contents.as_bytes()) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)?;
    Ok(true)
}

/// A route (or shared file) that could not be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFailure {
    pub route: String,
    pub platform: Option<Platform>,
    pub error: String,
}

/// Outcome of [`Emitter::build`].
#[derive(Debug, Default)]
pub struct BuildReport {
    pub routes: usize,
    pub written: Vec<PathBuf>,
    pub unchanged: Vec<PathBuf>,
    pub failures: Vec<BuildFailure>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, path: PathBuf, written: bool) {
        if written {
            self.written.push(path);
        } else {
            self.unchanged.push(path);
        }
    }

    fn fail(&mut self, route: impl Into<String>, platform: Option<Platform>, error: &EmitError) {
        let route = route.into();
        warn!(%route, platform = ?platform, error = %error, "build-api: route failed");
        self.failures.push(BuildFailure {
            route,
            platform,
            error: error.to_string(),
        });
    }
}

/// Builds platform modules for every handler under an API directory.
#[derive(Debug, Clone)]
pub struct Emitter {
    api_dir: PathBuf,
    out_dir: PathBuf,
    project_name: String,
}

impl Emitter {
    /// Read handlers from `api_dir` and write modules below `out_dir`, the project root.
    pub fn new(api_dir: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        let out_dir = out_dir.into();
        Self {
            api_dir: api_dir.into(),
            project_name: read_project_name(&out_dir),
            out_dir,
        }
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Emit every discovered route for every target. Per-route failures are
    /// collected in the report; only an unreadable API directory is an error.
    pub fn build(&self, targets: &[Platform]) -> Result<BuildReport, EmitError> {
        let routes = discover(&self.api_dir, &HandlerExtension::EMITTABLE)?;
        let mut report = BuildReport {
            routes: routes.len(),
            ..BuildReport::default()
        };
        let mut built: BTreeMap<Platform, Vec<RouteName>> = BTreeMap::new();
        // Netlify flattens `a/b` and `a-b` to the same file.
        let mut claimed: BTreeMap<PathBuf, RouteName> = BTreeMap::new();

        for found in &routes {
            let route = &found.route;
            let text = match fs::read_to_string(&found.path) {
                Ok(text) => text,
                Err(source) => {
                    let err = EmitError::Io {
                        path: found.path.clone(),
                        source,
                    };
                    report.fail(route.as_str(), None, &err);
                    continue;
                }
            };
            let handler_source = match prepare_source(route, &text, found.extension.kind()) {
                Ok(source) => source,
                Err(err) => {
                    report.fail(route.as_str(), None, &err);
                    continue;
                }
            };
            let source_file = display_path(&self.out_dir, &found.path);
            let module = RouteModule {
                route: route.as_str(),
                source_file: &source_file,
                handler_source: &handler_source,
            };

            for &platform in targets {
                let path = self.out_dir.join(platform.module_path(route));
                if let Some(taken_by) = claimed.get(&path) {
                    let err = EmitError::Collision {
                        path,
                        taken_by: taken_by.to_string(),
                    };
                    report.fail(route.as_str(), Some(platform), &err);
                    continue;
                }
                claimed.insert(path.clone(), route.clone());
                let result = render_module(platform, &module).and_then(|text| write_if_changed(&path, &text));
                match result {
                    Ok(written) => {
                        report.record(path, written);
                        built.entry(platform).or_default().push(route.clone());
                    }
                    Err(err) => report.fail(route.as_str(), Some(platform), &err),
                }
            }
        }

        if targets.contains(&Platform::Cloudflare) {
            let cloudflare_routes = built.remove(&Platform::Cloudflare).unwrap_or_default();
            self.write_cloudflare_extras(&cloudflare_routes, &mut report);
        }
        info!(
            routes = report.routes,
            written = report.written.len(),
            unchanged = report.unchanged.len(),
            failed = report.failures.len(),
            "build-api finished"
        );
        Ok(report)
    }

    fn write_cloudflare_extras(&self, routes: &[RouteName], report: &mut BuildReport) {
        let extras = [
            (WORKER_ENTRY, render_worker_index(&self.project_name, routes)),
            (WRANGLER_FILE, render_wrangler(&self.project_name)),
        ];
        for (file, rendered) in extras {
            let path = self.out_dir.join(file);
            match rendered.and_then(|text| write_if_changed(&path, &text)) {
                Ok(written) => report.record(path, written),
                Err(err) => report.fail(file, Some(Platform::Cloudflare), &err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_TS: &str = "import type { VercelRequest } from '@vercel/node';\n\
        export default function handler(req: VercelRequest, _res: any) {\n  return { message: 'hi', method: req.method };\n}\n";

    fn route(name: &str) -> RouteName {
        RouteName::parse(name).unwrap()
    }

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_discover_applies_priority_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "hello.ts", "export default () => 1");
        write(dir.path(), "hello.js", "export default () => 1");
        write(dir.path(), "users/list.mjs", "export default () => 1");
        write(dir.path(), ".secret.js", "export default () => 1");
        write(dir.path(), "node_modules/dep/index.js", "export default () => 1");
        write(dir.path(), "legacy.cjs", "module.exports = () => 1");
        write(dir.path(), "notes.md", "# notes");

        let routes = discover(dir.path(), &HandlerExtension::EMITTABLE).unwrap();
        let names: Vec<_> = routes.iter().map(|r| (r.route.as_str(), r.extension)).collect();
        assert_eq!(
            names,
            vec![("hello", HandlerExtension::Js), ("users/list", HandlerExtension::Mjs)]
        );

        let all = discover(dir.path(), &HandlerExtension::PRIORITY).unwrap();
        assert!(all.iter().any(|r| r.route.as_str() == "legacy"));
    }

    #[test]
    fn test_discover_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            discover(&dir.path().join("nope"), &HandlerExtension::EMITTABLE),
            Err(EmitError::MissingApiDir(_))
        ));
    }

    #[test]
    fn test_route_record() {
        let found = DiscoveredRoute {
            route: route("users/list"),
            path: PathBuf::from("/p/src/app/api/users/list.ts"),
            extension: HandlerExtension::Ts,
        };
        assert_eq!(
            found.record(Path::new("/p")),
            RouteRecord {
                path: "/api/users/list".to_string(),
                file: "src/app/api/users/list.ts".to_string(),
            }
        );
    }

    #[test]
    fn test_every_platform_embeds_runtime_and_handler() {
        for platform in Platform::ALL {
            let out = emit(HELLO_TS, &route("hello"), SourceKind::Typed, platform).unwrap();
            assert!(out.contains("class BiniResponse"), "{platform}");
            assert!(out.contains("async function biniDispatch"), "{platform}");
            assert!(out.contains("const __biniUserHandler = handler;"), "{platform}");
            assert!(!out.contains("VercelRequest"), "{platform}");
            assert!(!out.contains("export default function handler"), "{platform}");
            assert!(out.ends_with('\n'));
        }
    }

    #[test]
    fn test_platform_entry_points() {
        let emit_for = |p| emit("export default () => ({ ok: true })\n", &route("hello"), SourceKind::Script, p).unwrap();
        assert!(emit_for(Platform::Vercel).contains("export default async function (req, res)"));
        assert!(emit_for(Platform::Netlify).contains("export { biniNetlifyHandler as handler };"));
        assert!(emit_for(Platform::Netlify).contains(r#"event.path || "/api/hello""#));
        assert!(emit_for(Platform::Cloudflare).contains("async fetch(request, env, ctx)"));
        let verbs = emit_for(Platform::Verbs);
        for verb in ["GET", "POST", "PUT", "PATCH", "DELETE"] {
            assert!(verbs.contains(&format!("biniHandleVerb as {verb},")), "{verb}");
        }
        assert!(!emit_for(Platform::Vercel).contains("biniFromFetch"));
    }

    #[test]
    fn test_emit_is_deterministic() {
        for platform in Platform::ALL {
            let a = emit(HELLO_TS, &route("hello"), SourceKind::Typed, platform).unwrap();
            let b = emit(HELLO_TS, &route("hello"), SourceKind::Typed, platform).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_emit_rejects_module_without_default_export() {
        let err = emit("export const x = 1;\n", &route("x"), SourceKind::Script, Platform::Vercel).unwrap_err();
        assert!(matches!(
            err,
            EmitError::Transpile {
                source: TranspileError::MissingDefaultExport,
                ..
            }
        ));
    }

    #[test]
    fn test_worker_index_routes_sorted_modules() {
        let out = render_worker_index("demo", &[route("hello"), route("users/list")]).unwrap();
        assert!(out.starts_with("// Cloudflare Worker for demo."));
        assert!(out.contains(r#"import route0_hello from "./api/hello.js";"#));
        assert!(out.contains(r#"import route1_users_list from "./api/users/list.js";"#));
        assert!(out.contains(r#"["/api/users/list", route1_users_list],"#));
    }

    #[test]
    fn test_wrangler_toml() {
        let out = render_wrangler("my \"app\"").unwrap();
        let parsed: toml::Table = out.parse().unwrap();
        assert_eq!(parsed["name"].as_str(), Some("my \"app\""));
        assert_eq!(parsed["main"].as_str(), Some(WORKER_ENTRY));
        assert_eq!(parsed["compatibility_date"].as_str(), Some(COMPATIBILITY_DATE));
        assert_eq!(parsed["site"]["bucket"].as_str(), Some("./dist"));
    }

    #[test]
    fn test_project_name_from_package_json() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_project_name(dir.path()), DEFAULT_PROJECT_NAME);
        write(dir.path(), "package.json", r#"{"name": "shop"}"#);
        assert_eq!(read_project_name(dir.path()), "shop");
        write(dir.path(), "package.json", "{ not json");
        assert_eq!(read_project_name(dir.path()), DEFAULT_PROJECT_NAME);
    }

    #[test]
    fn test_build_writes_only_changed_files() {
        let root = tempfile::tempdir().unwrap();
        let api = root.path().join("src/app/api");
        write(&api, "hello.ts", HELLO_TS);
        write(&api, "broken.js", "export const nothing = 1;\n");

        let emitter = Emitter::new(&api, root.path()).with_project_name("demo");
        let targets = [Platform::Vercel, Platform::Cloudflare];
        let first = emitter.build(&targets).unwrap();
        assert_eq!(first.routes, 2);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].route, "broken");
        assert!(root.path().join("api/hello.js").is_file());
        assert!(root.path().join("worker/api/hello.js").is_file());
        assert!(root.path().join(WORKER_ENTRY).is_file());
        assert!(root.path().join(WRANGLER_FILE).is_file());
        assert_eq!(first.written.len(), 4);

        let before = fs::read_to_string(root.path().join("api/hello.js")).unwrap();
        let second = emitter.build(&targets).unwrap();
        assert!(second.written.is_empty());
        assert_eq!(second.unchanged.len(), 4);
        assert_eq!(fs::read_to_string(root.path().join("api/hello.js")).unwrap(), before);
    }
}
