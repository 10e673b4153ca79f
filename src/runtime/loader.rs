use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::core::{RuntimeError, ScriptRuntime};
use super::protocol::{ModuleRef, ShimStage};
use crate::adapter::{CanonicalRequest, ResponseBuilder};
use crate::dispatcher::{Handler, HandlerError};
use crate::resolver::{HandlerSource, LoadError, LoadStrategy, ModuleLoader};
use crate::transpile::{transpile, TranspileOptions};

impl From<RuntimeError> for LoadError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotInstalled { .. } => LoadError::MissingDependency(err.to_string()),
            other => LoadError::Failed(other.to_string()),
        }
    }
}

/// [`ModuleLoader`] that probes handler modules with a [`ScriptRuntime`].
pub struct ScriptLoader {
    runtime: Arc<ScriptRuntime>,
}

impl ScriptLoader {
    pub fn new(runtime: Arc<ScriptRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl ModuleLoader for ScriptLoader {
    async fn load(
        &self,
        source: &HandlerSource,
        strategy: LoadStrategy,
    ) -> Result<Arc<dyn Handler>, LoadError> {
        let module = match strategy {
            LoadStrategy::Direct => {
                ModuleRef::file(&source.path).map_err(|e| LoadError::Failed(e.to_string()))?
            }
            LoadStrategy::Transpile => {
                let code = transpile(&source.text, source.kind(), &TranspileOptions::handler())
                    .map_err(|e| LoadError::Failed(format!("transpile failed: {e}")))?;
                ModuleRef::inline(code)
            }
        };

        let result = self.runtime.probe(&module).await?;
        if result.ok {
            debug!(route = %source.route, %strategy, "handler module probed");
            return Ok(Arc::new(ScriptHandler {
                runtime: Arc::clone(&self.runtime),
                module,
            }));
        }
        match result.stage {
            Some(ShimStage::Export) => Err(LoadError::InvalidExport),
            _ => Err(LoadError::Failed(result.error_message())),
        }
    }
}

/// A probed handler module; every call runs it in a fresh runtime process.
pub struct ScriptHandler {
    runtime: Arc<ScriptRuntime>,
    module: ModuleRef,
}

impl ScriptHandler {
    pub fn new(runtime: Arc<ScriptRuntime>, module: ModuleRef) -> Self {
        Self { runtime, module }
    }
}

#[async_trait]
impl Handler for ScriptHandler {
    async fn call(
        &self,
        req: CanonicalRequest,
        res: ResponseBuilder,
    ) -> Result<Option<Value>, HandlerError> {
        let result = self
            .runtime
            .invoke(&self.module, &req, |op| op.apply(&res))
            .await
            .map_err(|e| HandlerError::new(e.to_string()))?;
        result.into_handler_result()
    }
}
