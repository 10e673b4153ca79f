use std::collections::VecDeque;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::protocol::{Frame, ModuleRef, ShimMode, ShimPayload, ShimResult};
use crate::adapter::{CanonicalRequest, ResponseOp};
use crate::config::{Mode, ScriptRuntimeConfig};

/// Tracing target for output written by handler code.
pub const HANDLER_LOG_TARGET: &str = "biniserve::handler";

/// Stderr lines kept for error reports.
const STDERR_TAIL: usize = 20;

const RESPONSE_JS: &str = include_str!("../../templates/runtime/response.js");
const SHIM_JS: &str = include_str!("../../templates/runtime/shim.js");

/// Source evaluated by the script runtime for every run.
pub fn shim_source() -> String {
    format!("{RESPONSE_JS}\n{SHIM_JS}")
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("script runtime '{program}' not found; install it or set BINI_SCRIPT_RUNTIME")]
    NotInstalled { program: String },
    #[error("failed to start script runtime '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("script runtime I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Protocol(String),
    #[error("script runtime exited ({status}) before reporting a result{}", stderr_suffix(.stderr))]
    Exited { status: String, stderr: String },
    #[error("script runtime killed after {limit:?} without reporting a result")]
    Killed { limit: Duration },
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// External program that executes handler modules through the embedded shim.
///
/// Each probe or invocation is a separate process, so module state never
/// leaks between requests.
#[derive(Debug)]
pub struct ScriptRuntime {
    program: String,
    args: Vec<String>,
    mode: Mode,
    max_lifetime: Option<Duration>,
    version: OnceCell<Option<String>>,
}

impl ScriptRuntime {
    pub fn new(config: &ScriptRuntimeConfig, mode: Mode) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            mode,
            max_lifetime: None,
            version: OnceCell::new(),
        }
    }

    /// Kill a process that has not reported a result within `limit`.
    ///
    /// Handlers keep running after a timed-out request, so without a cap a
    /// promise that never settles holds its process forever.
    pub fn with_max_lifetime(mut self, limit: Duration) -> Self {
        self.max_lifetime = Some(limit);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `<program> --version`, queried once. `None` when the program is unavailable.
    pub async fn version(&self) -> Option<String> {
        self.version
            .get_or_init(|| async {
                let output = Command::new(&self.program).arg("--version").output().await.ok()?;
                output
                    .status
                    .success()
                    .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
            })
            .await
            .clone()
    }

    /// Import `module` and check that its default export is callable.
    pub async fn probe(&self, module: &ModuleRef) -> Result<ShimResult, RuntimeError> {
        let payload = ShimPayload {
            mode: ShimMode::Probe,
            module,
            request: None,
        };
        self.run(&payload, |op| debug!(?op, "response op during probe ignored"))
            .await
    }

    /// Call the module's default export with `request`. Response-builder
    /// calls are passed to `on_op` as they happen.
    pub async fn invoke<F>(
        &self,
        module: &ModuleRef,
        request: &CanonicalRequest,
        on_op: F,
    ) -> Result<ShimResult, RuntimeError>
    where
        F: FnMut(ResponseOp) + Send,
    {
        let payload = ShimPayload {
            mode: ShimMode::Invoke,
            module,
            request: Some(request),
        };
        self.run(&payload, on_op).await
    }

    async fn run<F>(&self, payload: &ShimPayload<'_>, mut on_op: F) -> Result<ShimResult, RuntimeError>
    where
        F: FnMut(ResponseOp) + Send,
    {
        let input = serde_json::to_vec(payload)
            .map_err(|e| RuntimeError::Protocol(format!("cannot encode shim payload: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(shim_source())
            .env("NODE_ENV", self.mode.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => RuntimeError::NotInstalled {
                    program: self.program.clone(),
                },
                _ => RuntimeError::Spawn {
                    program: self.program.clone(),
                    source,
                },
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }
        let stderr = child.stderr.take().map(|s| tokio::spawn(forward_stderr(s)));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Protocol("script runtime stdout was not captured".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        let read = async {
            while let Some(line) = lines.next_line().await? {
                match Frame::parse(&line)? {
                    Some(Frame::Op(op)) => on_op(op),
                    Some(Frame::Result(result)) => return Ok(Some(result)),
                    None if line.is_empty() => {}
                    None => info!(target: HANDLER_LOG_TARGET, "{line}"),
                }
            }
            Ok::<_, RuntimeError>(None)
        };
        let reported = match self.max_lifetime {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(reported) => reported?,
                Err(_) => {
                    warn!(limit_ms = limit.as_millis() as u64, "script runtime outlived its limit; killing it");
                    if let Err(e) = child.kill().await {
                        debug!(error = %e, "failed to kill script runtime");
                    }
                    return Err(RuntimeError::Killed { limit });
                }
            },
            None => read.await?,
        };
        if let Some(result) = reported {
            tokio::spawn(drain(lines, child));
            return Ok(result);
        }

        let status = child.wait().await?;
        let stderr = match stderr {
            Some(task) => Vec::from(task.await.unwrap_or_default()).join("\n"),
            None => String::new(),
        };
        Err(RuntimeError::Exited {
            status: status.to_string(),
            stderr,
        })
    }
}

/// Log stderr lines as handler warnings, keeping the last few for error reports.
async fn forward_stderr<R: AsyncRead + Unpin>(stderr: R) -> VecDeque<String> {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        warn!(target: HANDLER_LOG_TARGET, "{line}");
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

/// Keep forwarding output of a handler that outlives its response, then reap it.
async fn drain(mut lines: Lines<BufReader<ChildStdout>>, mut child: Child) {
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.is_empty() && Frame::parse(&line).ok().flatten().is_none() {
            info!(target: HANDLER_LOG_TARGET, "{line}");
        }
    }
    if let Err(e) = child.wait().await {
        debug!(error = %e, "failed to reap script runtime");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shim_source_defines_response_builder_first() {
        let source = shim_source();
        let builder = source.find("class BiniResponse").unwrap();
        let import = source.find("await import(").unwrap();
        assert!(builder < import);
    }

    #[tokio::test]
    async fn test_missing_program_is_reported_by_name() {
        let runtime = ScriptRuntime::new(
            &ScriptRuntimeConfig {
                program: "bini-no-such-runtime".to_string(),
                args: Vec::new(),
            },
            Mode::Production,
        );
        let err = runtime
            .probe(&ModuleRef::inline("export default () => 1"))
            .await
            .unwrap_err();
        match err {
            RuntimeError::NotInstalled { program } => assert_eq!(program, "bini-no-such-runtime"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runtime.version().await, None);
    }
}
