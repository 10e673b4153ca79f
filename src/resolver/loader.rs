use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::dispatcher::Handler;
use crate::route::{HandlerExtension, RouteName, SourceKind};

/// How a handler module is turned into something callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Hand the file to the script runtime as-is.
    Direct,
    /// Strip TypeScript syntax first and load the resulting text.
    Transpile,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadStrategy::Direct => "direct",
            LoadStrategy::Transpile => "transpile",
        })
    }
}

/// A handler file located on disk and read into memory.
#[derive(Debug, Clone)]
pub struct HandlerSource {
    pub route: RouteName,
    pub path: PathBuf,
    pub extension: HandlerExtension,
    pub text: String,
}

impl HandlerSource {
    pub fn kind(&self) -> SourceKind {
        self.extension.kind()
    }
}

/// Why one load strategy failed.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The module loaded but its default export is not callable. Ends the strategy chain.
    #[error("Invalid API handler - export a default function")]
    InvalidExport,
    /// The strategy does not apply to this source.
    #[error("{0} strategy does not apply to this source")]
    Unsupported(LoadStrategy),
    /// A tool the strategy needs is missing (runtime binary, transpiler support).
    #[error("missing dependency: {0}")]
    MissingDependency(String),
    #[error("{0}")]
    Failed(String),
}

/// Turns a [`HandlerSource`] into a [`Handler`] using one strategy.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(
        &self,
        source: &HandlerSource,
        strategy: LoadStrategy,
    ) -> Result<Arc<dyn Handler>, LoadError>;
}
