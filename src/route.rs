//! # Route Names
//!
//! A route name is the path below `/api/` with no leading or trailing slash,
//! e.g. `/api/users/list` becomes `users/list` and `/api/` becomes `index`.
//! It maps onto `<api_dir>/<route>.<ext>` for the first extension in
//! [`HandlerExtension::PRIORITY`] that exists on disk.
//!
//! Route names are validated on construction so a [`RouteName`] can never
//! address a file outside the handler directory: every segment must be a
//! plain file-name component (no `.`/`..`, no empty segments, no separators,
//! no hidden files).

use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// URL prefix owned by the dispatch engine.
pub const API_PREFIX: &str = "/api";

/// Route used for the bare `/api` and `/api/` paths.
pub const INDEX_ROUTE: &str = "index";

/// Rejected route name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("path '{0}' is outside /api/")]
    NotApiPath(String),
    #[error("route '{route}' has an invalid segment '{segment}'")]
    InvalidSegment { route: String, segment: String },
}

/// Validated handler route name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteName(String);

impl RouteName {
    /// Validate an already-stripped route name.
    pub fn parse(route: &str) -> Result<Self, RouteError> {
        if route.is_empty() {
            return Ok(Self(INDEX_ROUTE.to_string()));
        }
        for segment in route.split('/') {
            if !is_plain_segment(segment) {
                return Err(RouteError::InvalidSegment {
                    route: route.to_string(),
                    segment: segment.to_string(),
                });
            }
        }
        Ok(Self(route.to_string()))
    }

    /// Derive the route name from a request path such as `/api/users/`.
    ///
    /// Only the path component is considered; callers strip the query first.
    pub fn from_request_path(path: &str) -> Result<Self, RouteError> {
        let rest = path
            .strip_prefix(API_PREFIX)
            .ok_or_else(|| RouteError::NotApiPath(path.to_string()))?;
        let rest = match rest {
            "" => "",
            r if r.starts_with('/') => &r[1..],
            _ => return Err(RouteError::NotApiPath(path.to_string())),
        };
        Self::parse(rest.strip_suffix('/').unwrap_or(rest))
    }

    /// Route for a handler file found under `api_dir`, if the file has a
    /// handler extension and a valid relative path.
    pub fn from_file(api_dir: &Path, file: &Path) -> Option<(Self, HandlerExtension)> {
        let ext = HandlerExtension::from_path(file)?;
        let rel = file.strip_prefix(api_dir).ok()?;
        let rel = rel.to_str()?.replace('\\', "/");
        let stem = rel.strip_suffix(ext.as_str())?;
        Self::parse(stem).ok().map(|route| (route, ext))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Candidate file for this route with the given extension.
    pub fn file_path(&self, api_dir: &Path, ext: HandlerExtension) -> PathBuf {
        let mut path = api_dir.to_path_buf();
        let mut segments = self.0.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_some() {
                path.push(segment);
            } else {
                path.push(format!("{segment}{}", ext.as_str()));
            }
        }
        path
    }

    /// Candidate files in resolution priority order.
    pub fn candidates(&self, api_dir: &Path) -> Vec<(HandlerExtension, PathBuf)> {
        HandlerExtension::PRIORITY
            .iter()
            .map(|ext| (*ext, self.file_path(api_dir, *ext)))
            .collect()
    }

    /// Public URL path of this route.
    pub fn url_path(&self) -> String {
        if self.0 == INDEX_ROUTE {
            format!("{API_PREFIX}/")
        } else {
            format!("{API_PREFIX}/{}", self.0)
        }
    }

    /// Identifier-safe form used for generated module names, e.g. `users/list` -> `users_list`.
    pub fn ident(&self) -> String {
        self.0
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

fn is_plain_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && !segment.contains(['\\', ':'])
        && !segment.chars().any(char::is_control)
}

impl fmt::Display for RouteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RouteName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Whether a source needs type stripping before a plain script runtime can load it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Script,
    Typed,
}

/// Recognised handler file extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandlerExtension {
    Js,
    Ts,
    Mjs,
    Cjs,
}

impl HandlerExtension {
    /// Resolution order when several files share a route name.
    pub const PRIORITY: [HandlerExtension; 4] = [
        HandlerExtension::Js,
        HandlerExtension::Ts,
        HandlerExtension::Mjs,
        HandlerExtension::Cjs,
    ];

    /// Extensions the platform emitters accept.
    pub const EMITTABLE: [HandlerExtension; 3] = [
        HandlerExtension::Js,
        HandlerExtension::Ts,
        HandlerExtension::Mjs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HandlerExtension::Js => ".js",
            HandlerExtension::Ts => ".ts",
            HandlerExtension::Mjs => ".mjs",
            HandlerExtension::Cjs => ".cjs",
        }
    }

    pub fn kind(self) -> SourceKind {
        match self {
            HandlerExtension::Ts => SourceKind::Typed,
            _ => SourceKind::Script,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "js" => Some(HandlerExtension::Js),
            "ts" => Some(HandlerExtension::Ts),
            "mjs" => Some(HandlerExtension::Mjs),
            "cjs" => Some(HandlerExtension::Cjs),
            _ => None,
        }
    }

    /// Extensions in lookup order, as listed in development 404 bodies.
    pub fn priority_list() -> Vec<String> {
        Self::PRIORITY.iter().map(|e| e.as_str().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_strips_prefix_and_trailing_slash() {
        assert_eq!(
            RouteName::from_request_path("/api/users/").unwrap().as_str(),
            "users"
        );
        assert_eq!(
            RouteName::from_request_path("/api/users/list").unwrap().as_str(),
            "users/list"
        );
    }

    #[test]
    fn test_empty_route_is_index() {
        assert_eq!(RouteName::from_request_path("/api/").unwrap().as_str(), "index");
        assert_eq!(RouteName::from_request_path("/api").unwrap().as_str(), "index");
    }

    #[test]
    fn test_non_api_paths_rejected() {
        assert!(matches!(
            RouteName::from_request_path("/apis/x"),
            Err(RouteError::NotApiPath(_))
        ));
        assert!(RouteName::from_request_path("/about").is_err());
    }

    #[test]
    fn test_traversal_rejected() {
        for bad in ["/api/../secret", "/api/a/../../b", "/api/./x", "/api/a//b", "/api/.env", "/api/a\\b"] {
            assert!(
                matches!(
                    RouteName::from_request_path(bad),
                    Err(RouteError::InvalidSegment { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_candidates_follow_priority() {
        let route = RouteName::parse("users/list").unwrap();
        let candidates = route.candidates(Path::new("/srv/api"));
        let files: Vec<_> = candidates
            .iter()
            .map(|(_, p)| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            files,
            vec![
                "/srv/api/users/list.js",
                "/srv/api/users/list.ts",
                "/srv/api/users/list.mjs",
                "/srv/api/users/list.cjs",
            ]
        );
    }

    #[test]
    fn test_from_file_round_trips_nested_route() {
        let (route, ext) =
            RouteName::from_file(Path::new("/srv/api"), Path::new("/srv/api/v1/hello.ts")).unwrap();
        assert_eq!(route.as_str(), "v1/hello");
        assert_eq!(ext, HandlerExtension::Ts);
        assert_eq!(route.url_path(), "/api/v1/hello");
        assert_eq!(route.ident(), "v1_hello");
        assert!(RouteName::from_file(Path::new("/srv/api"), Path::new("/srv/api/notes.md")).is_none());
    }

    #[test]
    fn test_source_kind() {
        assert_eq!(HandlerExtension::Ts.kind(), SourceKind::Typed);
        assert_eq!(HandlerExtension::Cjs.kind(), SourceKind::Script);
        assert_eq!(HandlerExtension::priority_list(), [".js", ".ts", ".mjs", ".cjs"]);
    }
}
