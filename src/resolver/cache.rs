use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::core::HandlerModule;
use crate::route::RouteName;

#[derive(Debug, Clone)]
struct CacheEntry {
    module: Arc<HandlerModule>,
    inserted_at: Instant,
}

/// Resolved handlers keyed by route name.
#[derive(Debug, Default)]
pub struct HandlerCache {
    entries: DashMap<RouteName, CacheEntry>,
}

impl HandlerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached module for `route` if it was inserted less than `ttl` before `now`.
    /// Expired entries are removed on the way.
    pub fn get_fresh(&self, route: &RouteName, now: Instant, ttl: Duration) -> Option<Arc<HandlerModule>> {
        let is_fresh = |entry: &CacheEntry| now.saturating_duration_since(entry.inserted_at) < ttl;
        {
            let entry = self.entries.get(route)?;
            if is_fresh(&entry) {
                return Some(Arc::clone(&entry.module));
            }
        }
        self.entries.remove_if(route, |_, entry| !is_fresh(entry));
        None
    }

    pub fn insert(&self, module: Arc<HandlerModule>, now: Instant) {
        self.entries.insert(
            module.route.clone(),
            CacheEntry {
                module,
                inserted_at: now,
            },
        );
    }

    pub fn remove(&self, route: &RouteName) -> bool {
        self.entries.remove(route).is_some()
    }

    /// Remove every entry whose route begins with `prefix`. Returns how many went.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|route, _| !route.as_str().starts_with(prefix));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(prefix, removed, "invalidated cached handlers");
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
