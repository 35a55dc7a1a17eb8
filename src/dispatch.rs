//! Plugin dispatch: look up, gate, invoke.
//!
//! Each invocation runs inside a `plugin` span carrying the plugin ID,
//! command, and transport, and logs the transition from idle into the
//! operation's in-flight state (`Detecting`, `Ingesting`, ...) and back
//! out to `Done` or `Failed`.

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

use crate::config::Config;
use crate::error::PluginError;
use crate::protocol::{
    DetectResult, EmitArgs, EmitNativeResult, EnumerateResult, ExtractIrResult, IngestResult,
    InputArgs, OutputArgs, PluginRequest, PluginResponse,
};
use crate::registry::{PluginKind, PluginRegistry};
use crate::transport::TransportKind;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    external_enabled: bool,
}

impl Dispatcher {
    pub fn new(registry: Arc<PluginRegistry>, external_enabled: bool) -> Self {
        Self {
            registry,
            external_enabled,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(PluginRegistry::from_config(config)),
            config.dispatch.external_enabled,
        )
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn external_enabled(&self) -> bool {
        self.external_enabled
    }

    /// Send `request` to `plugin_id` and return its response.
    pub async fn invoke(
        &self,
        plugin_id: &str,
        request: PluginRequest,
    ) -> Result<PluginResponse, PluginError> {
        let plugin = self
            .registry
            .lookup(plugin_id)
            .ok_or_else(|| PluginError::NotRegistered(plugin_id.to_string()))?;
        let transport = plugin.transport.kind();
        if transport == TransportKind::External && !self.external_enabled {
            return Err(PluginError::ExternalDisabled(plugin_id.to_string()));
        }

        let command = request.command().to_string();
        let state = request.operation().map(|op| op.state()).unwrap_or("Executing");
        let span = tracing::info_span!(
            "plugin",
            plugin = %plugin_id,
            command = %command,
            transport = %transport
        );

        async move {
            tracing::debug!("Idle -> {}", state);
            let result = plugin.transport.invoke(request).await;
            match &result {
                Ok(_) => tracing::debug!("{} -> Done", state),
                Err(e) => tracing::debug!(kind = %e.kind(), "{} -> Failed: {}", state, e),
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn detect(&self, plugin_id: &str, path: &Path) -> Result<DetectResult, PluginError> {
        match self
            .invoke(plugin_id, PluginRequest::Detect(InputArgs::path(path)))
            .await?
        {
            PluginResponse::Detect(r) => Ok(r),
            other => Err(mismatch(plugin_id, "detect", &other)),
        }
    }

    pub async fn ingest(
        &self,
        plugin_id: &str,
        path: &Path,
        output_dir: &Path,
    ) -> Result<IngestResult, PluginError> {
        match self
            .invoke(plugin_id, PluginRequest::Ingest(OutputArgs::new(path, output_dir)))
            .await?
        {
            PluginResponse::Ingest(r) => Ok(r),
            other => Err(mismatch(plugin_id, "ingest", &other)),
        }
    }

    pub async fn enumerate(
        &self,
        plugin_id: &str,
        path: &Path,
    ) -> Result<EnumerateResult, PluginError> {
        match self
            .invoke(plugin_id, PluginRequest::Enumerate(InputArgs::path(path)))
            .await?
        {
            PluginResponse::Enumerate(r) => Ok(r),
            other => Err(mismatch(plugin_id, "enumerate", &other)),
        }
    }

    pub async fn extract_ir(
        &self,
        plugin_id: &str,
        path: &Path,
        output_dir: &Path,
    ) -> Result<ExtractIrResult, PluginError> {
        match self
            .invoke(plugin_id, PluginRequest::ExtractIr(OutputArgs::new(path, output_dir)))
            .await?
        {
            PluginResponse::ExtractIr(r) => Ok(r),
            other => Err(mismatch(plugin_id, "extract-ir", &other)),
        }
    }

    pub async fn emit_native(
        &self,
        plugin_id: &str,
        ir_path: &Path,
        output_dir: &Path,
    ) -> Result<EmitNativeResult, PluginError> {
        match self
            .invoke(plugin_id, PluginRequest::EmitNative(EmitArgs::new(ir_path, output_dir)))
            .await?
        {
            PluginResponse::EmitNative(r) => Ok(r),
            other => Err(mismatch(plugin_id, "emit-native", &other)),
        }
    }

    /// Run a tool-plugin command.
    pub async fn execute(
        &self,
        plugin_id: &str,
        command: &str,
        args: Value,
    ) -> Result<Value, PluginError> {
        let request = PluginRequest::Execute {
            command: command.to_string(),
            args,
        };
        match self.invoke(plugin_id, request).await? {
            PluginResponse::Execute(v) => Ok(v),
            other => Err(mismatch(plugin_id, command, &other)),
        }
    }

    /// Ask every usable format plugin, in ID order, whether it claims
    /// `path`; return the first that does.
    ///
    /// External plugins are skipped while external dispatch is disabled.
    /// A plugin that fails outright is logged and passed over.
    pub async fn detect_any(&self, path: &Path) -> Option<(String, DetectResult)> {
        for plugin in self.registry.plugins() {
            if plugin.manifest.kind != PluginKind::Format {
                continue;
            }
            if plugin.transport.kind() == TransportKind::External && !self.external_enabled {
                continue;
            }
            let id = plugin.manifest.plugin_id;
            match self.detect(&id, path).await {
                Ok(result) if result.detected => return Some((id, result)),
                Ok(_) => {}
                Err(e) => tracing::warn!(plugin = %id, "detect failed: {}", e),
            }
        }
        None
    }
}

fn mismatch(plugin_id: &str, command: &str, response: &PluginResponse) -> PluginError {
    PluginError::transport(
        plugin_id,
        format!("{} returned a mismatched response: {:?}", command, response),
    )
}
