//! How a request reaches a plugin.
//!
//! [`EmbeddedTransport`] calls an in-process [`Handler`] on the blocking
//! pool. [`ExternalTransport`] runs the plugin's entrypoint as a child
//! process, writes one JSON request to its stdin, closes it, and reads
//! exactly one JSON response from its stdout. Stderr is diagnostic only
//! and goes to the log.
//!
//! Failure classification for external plugins:
//!
//! | Observed | Error |
//! |----------|-------|
//! | spawn fails, stdout not one JSON document, ok reply with no/invalid result | transport |
//! | no reply within the timeout (child is killed) | transport (timeout) |
//! | `{"status":"error", ...}` | the reported kind, or application |

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::PluginError;
use crate::protocol::{IpcResponse, PluginRequest, PluginResponse, Status};
use crate::traits::Handler;

/// Longest stderr excerpt carried into a transport error message.
const STDERR_EXCERPT: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Embedded,
    External,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Embedded => "embedded",
            TransportKind::External => "external",
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn invoke(&self, request: PluginRequest) -> Result<PluginResponse, PluginError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Embedded
// ═══════════════════════════════════════════════════════════════════════

pub struct EmbeddedTransport {
    handler: Handler,
}

impl EmbeddedTransport {
    pub fn new(handler: Handler) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Transport for EmbeddedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Embedded
    }

    async fn invoke(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        let handler = self.handler.clone();
        tokio::task::spawn_blocking(move || handler.handle(request))
            .await
            .map_err(|e| PluginError::transport("embedded", format!("plugin task failed: {}", e)))?
    }
}

// ═══════════════════════════════════════════════════════════════════════
// External
// ═══════════════════════════════════════════════════════════════════════

pub struct ExternalTransport {
    plugin_id: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalTransport {
    pub fn new(
        plugin_id: impl Into<String>,
        program: impl Into<PathBuf>,
        args: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn fail(&self, message: impl Into<String>) -> PluginError {
        PluginError::transport(self.plugin_id.clone(), message)
    }
}

#[async_trait]
impl Transport for ExternalTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::External
    }

    async fn invoke(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        let ipc = request.to_ipc()?;
        let payload =
            serde_json::to_vec(&ipc).map_err(|e| PluginError::Argument(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.fail(format!("failed to spawn {}: {}", self.program.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.fail("child stdin was not captured"))?;

        let exchange = async move {
            let write = async move {
                let written = stdin.write_all(&payload).await;
                drop(stdin);
                written
            };
            let (written, output) = tokio::join!(write, child.wait_with_output());
            (written, output)
        };

        // Dropping the exchange on timeout drops the child, which kills it.
        let (written, output) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| PluginError::Timeout {
                plugin: self.plugin_id.clone(),
                timeout: self.timeout,
            })?;
        let output = output.map_err(|e| self.fail(format!("failed to wait for plugin: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            tracing::debug!(plugin = %self.plugin_id, "stderr: {}", line);
        }
        if let Err(e) = written {
            // A plugin may answer without reading its input.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(self.fail(format!("failed to write request: {}", e)));
            }
        }

        let response: IpcResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            self.fail(format!(
                "unparseable response ({}; {}){}",
                output.status,
                e,
                if excerpt.is_empty() {
                    String::new()
                } else {
                    format!(": {}", excerpt)
                }
            ))
        })?;

        match response.status {
            Status::Error => Err(PluginError::reported(
                response
                    .error
                    .unwrap_or_else(|| "plugin reported an error without a message".to_string()),
                response.code.as_deref(),
            )),
            Status::Ok => {
                if !output.status.success() {
                    tracing::warn!(
                        plugin = %self.plugin_id,
                        status = %output.status,
                        "plugin replied ok but exited unsuccessfully"
                    );
                }
                let result = response
                    .result
                    .ok_or_else(|| self.fail("ok response without a result"))?;
                PluginResponse::from_value(&request, result)
                    .map_err(|e| self.fail(format!("malformed result: {}", e)))
            }
        }
    }
}
