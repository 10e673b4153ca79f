//! # Hot Reload Module
//!
//! Watches the API directory during development and keeps the resolver's
//! handler cache honest. Every handler file event purges the cache entries
//! whose route starts with the file's route (so renames and extension swaps
//! are caught too) and publishes an [`ApiUpdate`] on a broadcast channel for
//! whoever wants to tell the browser. Creating or removing a directory
//! clears the whole cache.
//!
//! Editors tend to produce bursts of notifications for a single save, so an
//! event repeating the same path and action within [`DEDUP_WINDOW`] is dropped.
//!
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::broadcast::channel(64);
//! let _watcher = watch_api_dir(&api_dir, Arc::clone(&resolver), tx)?;
//! while let Ok(update) = rx.recv().await {
//!     println!("{} {}", update.action, update.route);
//! }
//! ```

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::resolver::Resolver;
use crate::route::{HandlerExtension, RouteName};

/// Repeats of the same path and action inside this window are ignored.
pub const DEDUP_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiAction {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
}

impl ApiAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiAction::Add => "add",
            ApiAction::Change => "change",
            ApiAction::Unlink => "unlink",
            ApiAction::AddDir => "addDir",
            ApiAction::UnlinkDir => "unlinkDir",
        }
    }

    fn is_dir(self) -> bool {
        matches!(self, ApiAction::AddDir | ApiAction::UnlinkDir)
    }
}

impl fmt::Display for ApiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification published for each handler change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiUpdate {
    /// Route name, or the directory path relative to the API directory.
    pub route: String,
    pub file: PathBuf,
    pub action: ApiAction,
}

/// Turns filesystem events into cache invalidations and [`ApiUpdate`]s.
pub struct ApiReloader {
    api_dir: PathBuf,
    resolver: Arc<Resolver>,
    events: broadcast::Sender<ApiUpdate>,
    recent: Mutex<HashMap<(PathBuf, ApiAction), Instant>>,
}

impl ApiReloader {
    pub fn new(api_dir: impl Into<PathBuf>, resolver: Arc<Resolver>, events: broadcast::Sender<ApiUpdate>) -> Self {
        Self {
            api_dir: api_dir.into(),
            resolver,
            events,
            recent: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle(&self, event: &Event) -> Vec<ApiUpdate> {
        self.handle_at(event, Instant::now())
    }

    /// Process one event against an explicit clock reading.
    pub fn handle_at(&self, event: &Event, now: Instant) -> Vec<ApiUpdate> {
        let mut updates = Vec::new();
        for path in &event.paths {
            let Some(action) = classify(&event.kind, path) else {
                continue;
            };
            if self.is_repeat(path, action, now) {
                continue;
            }
            if let Some(update) = self.apply(path, action) {
                if self.events.send(update.clone()).is_err() {
                    debug!(route = %update.route, "no reload subscribers");
                }
                updates.push(update);
            }
        }
        updates
    }

    fn is_repeat(&self, path: &Path, action: ApiAction, now: Instant) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
        recent.retain(|_, seen| now.saturating_duration_since(*seen) < DEDUP_WINDOW);
        let key = (path.to_path_buf(), action);
        if recent.contains_key(&key) {
            return true;
        }
        recent.insert(key, now);
        false
    }

    fn apply(&self, path: &Path, action: ApiAction) -> Option<ApiUpdate> {
        let rel = path.strip_prefix(&self.api_dir).ok()?;
        if action.is_dir() {
            self.resolver.clear();
            let route = rel.to_string_lossy().replace('\\', "/");
            info!(dir = %route, %action, "API directory changed; handler cache cleared");
            return Some(ApiUpdate {
                route,
                file: path.to_path_buf(),
                action,
            });
        }

        let (route, _) = RouteName::from_file(&self.api_dir, path)?;
        let purged = self.resolver.invalidate_prefix(route.as_str());
        match action {
            ApiAction::Change => debug!(%route, purged, "handler changed"),
            _ => info!(%route, file = %rel.display(), %action, "page reload"),
        }
        Some(ApiUpdate {
            route: route.to_string(),
            file: path.to_path_buf(),
            action,
        })
    }
}

fn is_handler_file(path: &Path) -> bool {
    HandlerExtension::from_path(path).is_some()
}

/// Map a notify event kind onto a reload action for `path`.
fn classify(kind: &EventKind, path: &Path) -> Option<ApiAction> {
    let handler = is_handler_file(path);
    match kind {
        EventKind::Create(CreateKind::Folder) => Some(ApiAction::AddDir),
        EventKind::Create(_) if handler => Some(ApiAction::Add),
        EventKind::Create(_) if path.is_dir() => Some(ApiAction::AddDir),
        EventKind::Remove(RemoveKind::Folder) => Some(ApiAction::UnlinkDir),
        EventKind::Remove(_) if handler => Some(ApiAction::Unlink),
        // A removed path without a handler extension may have been a directory.
        EventKind::Remove(RemoveKind::Any | RemoveKind::Other) => Some(ApiAction::UnlinkDir),
        EventKind::Modify(ModifyKind::Name(_)) => match (handler, path.exists()) {
            (true, true) => Some(ApiAction::Add),
            (true, false) => Some(ApiAction::Unlink),
            (false, true) if path.is_dir() => Some(ApiAction::AddDir),
            (false, false) => Some(ApiAction::UnlinkDir),
            _ => None,
        },
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) if handler => Some(ApiAction::Change),
        _ => None,
    }
}

/// Keeps the watcher alive; dropping it stops watching.
pub struct ApiWatcher {
    _watcher: RecommendedWatcher,
    reloader: Arc<ApiReloader>,
}

impl ApiWatcher {
    pub fn reloader(&self) -> &ApiReloader {
        &self.reloader
    }
}

/// Watch `api_dir` recursively, invalidating `resolver` and publishing on `events`.
pub fn watch_api_dir(
    api_dir: impl AsRef<Path>,
    resolver: Arc<Resolver>,
    events: broadcast::Sender<ApiUpdate>,
) -> notify::Result<ApiWatcher> {
    let api_dir = api_dir.as_ref().to_path_buf();
    // Events carry absolute paths.
    let watched = std::fs::canonicalize(&api_dir).unwrap_or_else(|_| api_dir.clone());
    let reloader = Arc::new(ApiReloader::new(watched.clone(), resolver, events));

    let handler = Arc::clone(&reloader);
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                handler.handle(&event);
            }
            Err(e) => warn!(error = %e, "API watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(&watched, RecursiveMode::Recursive)?;
    info!(dir = %watched.display(), "watching API handlers");

    Ok(ApiWatcher {
        _watcher: watcher,
        reloader,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{handler_fn, Handler};
    use crate::resolver::{HandlerSource, LoadError, LoadStrategy, ModuleLoader, ResolverOptions};
    use async_trait::async_trait;
    use notify::event::DataChange;
    use std::fs;

    struct ConstLoader;

    #[async_trait]
    impl ModuleLoader for ConstLoader {
        async fn load(&self, _: &HandlerSource, _: LoadStrategy) -> Result<Arc<dyn Handler>, LoadError> {
            Ok(Arc::new(handler_fn(|_req, _res| async { Ok(None) })))
        }
    }

    fn setup() -> (tempfile::TempDir, Arc<Resolver>, ApiReloader, broadcast::Receiver<ApiUpdate>) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("users")).unwrap();
        fs::write(dir.path().join("hello.ts"), "export default () => 1").unwrap();
        fs::write(dir.path().join("users/list.js"), "export default () => 1").unwrap();
        let resolver = Arc::new(Resolver::new(
            dir.path(),
            Arc::new(ConstLoader),
            ResolverOptions::production(),
        ));
        let (tx, rx) = broadcast::channel(16);
        let reloader = ApiReloader::new(dir.path(), Arc::clone(&resolver), tx);
        (dir, resolver, reloader, rx)
    }

    async fn warm(resolver: &Resolver, routes: &[&str]) {
        for r in routes {
            resolver.resolve(&RouteName::parse(r).unwrap()).await.unwrap();
        }
    }

    fn event(kind: EventKind, path: PathBuf) -> Event {
        Event::new(kind).add_path(path)
    }

    #[tokio::test]
    async fn test_change_invalidates_route_and_publishes() {
        let (dir, resolver, reloader, mut rx) = setup();
        warm(&resolver, &["hello", "users/list"]).await;
        assert_eq!(resolver.cached_handlers(), 2);

        let updates = reloader.handle(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            dir.path().join("hello.ts"),
        ));
        assert_eq!(updates.len(), 1);
        assert_eq!(resolver.cached_handlers(), 1);
        let update = rx.try_recv().unwrap();
        assert_eq!(update.route, "hello");
        assert_eq!(update.action, ApiAction::Change);
    }

    #[tokio::test]
    async fn test_duplicate_events_are_dropped() {
        let (dir, _resolver, reloader, _rx) = setup();
        let ev = event(EventKind::Create(CreateKind::File), dir.path().join("hello.ts"));
        let start = Instant::now();
        assert_eq!(reloader.handle_at(&ev, start).len(), 1);
        assert!(reloader.handle_at(&ev, start + Duration::from_millis(10)).is_empty());
        assert_eq!(reloader.handle_at(&ev, start + Duration::from_millis(60)).len(), 1);
    }

    #[tokio::test]
    async fn test_directory_removal_clears_cache() {
        let (dir, resolver, reloader, _rx) = setup();
        warm(&resolver, &["hello", "users/list"]).await;
        let updates = reloader.handle(&event(
            EventKind::Remove(RemoveKind::Folder),
            dir.path().join("users"),
        ));
        assert_eq!(updates[0].action, ApiAction::UnlinkDir);
        assert_eq!(updates[0].route, "users");
        assert_eq!(resolver.cached_handlers(), 0);
    }

    #[tokio::test]
    async fn test_non_handler_files_ignored() {
        let (dir, resolver, reloader, _rx) = setup();
        warm(&resolver, &["hello"]).await;
        let updates = reloader.handle(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            dir.path().join("README.md"),
        ));
        assert!(updates.is_empty());
        assert_eq!(resolver.cached_handlers(), 1);
    }

    #[test]
    fn test_classify_rename() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.ts");
        fs::write(&present, "").unwrap();
        let gone = dir.path().join("b.ts");
        let kind = EventKind::Modify(ModifyKind::Name(notify::event::RenameMode::Any));
        assert_eq!(classify(&kind, &present), Some(ApiAction::Add));
        assert_eq!(classify(&kind, &gone), Some(ApiAction::Unlink));
    }
}
