use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::route::RouteName;

/// Deployment target of the emitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Node `(req, res)` callback as the default export.
    Vercel,
    /// `handler(event, context)` returning `{statusCode, headers, body}`.
    Netlify,
    /// Default-exported object with `fetch(request, env, ctx)`.
    Cloudflare,
    /// One exported Fetch handler per HTTP verb.
    Verbs,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Vercel,
        Platform::Netlify,
        Platform::Cloudflare,
        Platform::Verbs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Vercel => "vercel",
            Platform::Netlify => "netlify",
            Platform::Cloudflare => "cloudflare",
            Platform::Verbs => "verbs",
        }
    }

    /// Directory, relative to the output root, holding this platform's modules.
    pub fn output_dir(self) -> &'static str {
        match self {
            Platform::Vercel => "api",
            Platform::Netlify => "netlify/functions",
            Platform::Cloudflare => "worker/api",
            Platform::Verbs => "dist/api",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Platform::Netlify => "mjs",
            _ => "js",
        }
    }

    /// Module path for `route`, relative to the output root.
    ///
    /// Netlify functions cannot be nested, so nested routes are flattened
    /// with `-` there (`users/list` becomes `users-list.mjs`).
    pub fn module_path(self, route: &RouteName) -> PathBuf {
        let mut path = PathBuf::from(self.output_dir());
        match self {
            Platform::Netlify => {
                path.push(format!("{}.{}", route.as_str().replace('/', "-"), self.extension()));
            }
            _ => {
                let mut segments = route.as_str().split('/').peekable();
                while let Some(segment) = segments.next() {
                    if segments.peek().is_some() {
                        path.push(segment);
                    } else {
                        path.push(format!("{segment}.{}", self.extension()));
                    }
                }
            }
        }
        path
    }

    /// Parse a comma-separated target list such as `vercel,netlify`.
    pub fn parse_list(list: &str) -> Result<Vec<Platform>, String> {
        let mut targets = Vec::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let platform = item.parse()?;
            if !targets.contains(&platform) {
                targets.push(platform);
            }
        }
        if targets.is_empty() {
            return Err("no build target given".to_string());
        }
        Ok(targets)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<_> = Platform::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown target '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module path relative to `from_dir`, as a `./`-prefixed import specifier.
pub(crate) fn import_specifier(from_dir: &Path, module: &Path) -> String {
    let rel = module.strip_prefix(from_dir).unwrap_or(module);
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("./{}", parts.join("/"))
}
