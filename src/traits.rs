//! Extension traits for format and tool plugins.
//!
//! Implement [`FormatPlugin`] to teach the bridge a new native format, or
//! [`ToolPlugin`] to wrap an external utility. Either can be registered
//! in-process (embedded) through a [`Handler`], or compiled into any binary
//! that serves the stdio protocol (see [`crate::server`]) and registered
//! as an external plugin.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │             PluginRegistry               │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐  │
//! │  │Built-in │ │ Custom  │ │  External  │  │
//! │  │usfm/usx │ │ (Rust)  │ │ subprocess │  │
//! │  └─────────┘ └─────────┘ └────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!       Dispatcher::invoke() → Transport
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::path::Path;
//! use codex_bridge::protocol::DetectResult;
//! use codex_bridge::traits::FormatPlugin;
//!
//! struct Plain;
//!
//! impl FormatPlugin for Plain {
//!     fn format(&self) -> &str { "plain" }
//!
//!     fn detect(&self, path: &Path) -> DetectResult {
//!         match path.extension().and_then(|e| e.to_str()) {
//!             Some("txt") => DetectResult::found("plain", "extension .txt"),
//!             _ => DetectResult::not_found("not a .txt file"),
//!         }
//!     }
//! }
//! ```

use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::error::PluginError;
use crate::formats::common;
use crate::protocol::{
    DetectResult, EmitNativeResult, EnumerateResult, ExtractIrResult, IngestResult, Operation,
    PluginRequest, PluginResponse,
};
use crate::registry::PluginKind;

// ═══════════════════════════════════════════════════════════════════════
// FormatPlugin Trait
// ═══════════════════════════════════════════════════════════════════════

/// A native format: detection, ingestion, listing, and IR conversion.
///
/// Operations are synchronous; the embedded transport runs them on the
/// blocking pool. Only [`format`](FormatPlugin::format) and
/// [`detect`](FormatPlugin::detect) are required. Ingest and Enumerate
/// default to whole-file behaviour, and the IR operations default to an
/// unsupported-operation error, which is the correct answer for
/// containers and opaque formats.
pub trait FormatPlugin: Send + Sync {
    /// Format name used in results, IR file names, and raw keys
    /// (`"usfm"`, `"tar.gz"`).
    fn format(&self) -> &str;

    /// Decide whether `path` is in this format.
    ///
    /// Never fails: a missing or unreadable input is a negative result
    /// with a reason.
    fn detect(&self, path: &Path) -> DetectResult;

    /// Identifier for an ingested artifact. Defaults to the file stem.
    fn artifact_id(&self, path: &Path, _bytes: &[u8]) -> String {
        common::default_artifact_id(path)
    }

    /// Store the input in the blob store rooted at `output_dir`.
    fn ingest(&self, path: &Path, output_dir: &Path) -> Result<IngestResult, PluginError> {
        let bytes = common::read_input(path)?;
        let artifact_id = self.artifact_id(path, &bytes);
        common::store(path, &bytes, output_dir, artifact_id, self.format())
    }

    /// List the input's contents.
    fn enumerate(&self, path: &Path) -> Result<EnumerateResult, PluginError> {
        common::enumerate_path(path)
    }

    /// Parse the input into an IR file under `output_dir`.
    fn extract_ir(&self, _path: &Path, _output_dir: &Path) -> Result<ExtractIrResult, PluginError> {
        Err(PluginError::unsupported(self.format(), Operation::ExtractIr))
    }

    /// Write the IR at `ir_path` back out in this format.
    fn emit_native(
        &self,
        _ir_path: &Path,
        _output_dir: &Path,
    ) -> Result<EmitNativeResult, PluginError> {
        Err(PluginError::unsupported(self.format(), Operation::EmitNative))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// ToolPlugin Trait
// ═══════════════════════════════════════════════════════════════════════

/// A utility plugin with free-form commands.
pub trait ToolPlugin: Send + Sync {
    /// Tool name (`"calibre"`).
    fn name(&self) -> &str;

    /// Run `command` with JSON `args`.
    fn execute(&self, command: &str, args: &Value) -> Result<Value, PluginError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Handler
// ═══════════════════════════════════════════════════════════════════════

/// An in-process plugin of either kind, able to answer any
/// [`PluginRequest`].
///
/// Both the embedded transport and the stdio server go through
/// [`Handler::handle`], which is what keeps the two transports
/// indistinguishable to callers.
#[derive(Clone)]
pub enum Handler {
    Format(Arc<dyn FormatPlugin>),
    Tool(Arc<dyn ToolPlugin>),
}

impl Handler {
    pub fn format(plugin: impl FormatPlugin + 'static) -> Self {
        Handler::Format(Arc::new(plugin))
    }

    pub fn tool(plugin: impl ToolPlugin + 'static) -> Self {
        Handler::Tool(Arc::new(plugin))
    }

    pub fn kind(&self) -> PluginKind {
        match self {
            Handler::Format(_) => PluginKind::Format,
            Handler::Tool(_) => PluginKind::Tool,
        }
    }

    pub fn handle(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        match self {
            Handler::Format(plugin) => handle_format(plugin.as_ref(), request),
            Handler::Tool(tool) => {
                let value = match request {
                    PluginRequest::Execute { command, args } => tool.execute(&command, &args)?,
                    other => tool.execute(other.command(), &other.args_value()?)?,
                };
                Ok(PluginResponse::Execute(value))
            }
        }
    }
}

fn handle_format(
    plugin: &dyn FormatPlugin,
    request: PluginRequest,
) -> Result<PluginResponse, PluginError> {
    Ok(match request {
        PluginRequest::Detect(args) => {
            let path = args.resolve()?;
            PluginResponse::Detect(plugin.detect(&path))
        }
        PluginRequest::Ingest(args) => {
            let path = args.input.resolve()?;
            PluginResponse::Ingest(plugin.ingest(&path, args.output_dir()?)?)
        }
        PluginRequest::Enumerate(args) => {
            let path = args.resolve()?;
            PluginResponse::Enumerate(plugin.enumerate(&path)?)
        }
        PluginRequest::ExtractIr(args) => {
            let path = args.input.resolve()?;
            PluginResponse::ExtractIr(plugin.extract_ir(&path, args.output_dir()?)?)
        }
        PluginRequest::EmitNative(args) => {
            PluginResponse::EmitNative(plugin.emit_native(args.ir_path()?, args.output_dir()?)?)
        }
        PluginRequest::Execute { command, .. } => {
            return Err(PluginError::UnknownCommand(command));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::{EmitArgs, InputArgs, OutputArgs};
    use serde_json::json;

    struct Opaque;

    impl FormatPlugin for Opaque {
        fn format(&self) -> &str {
            "opaque"
        }

        fn detect(&self, _path: &Path) -> DetectResult {
            DetectResult::not_found("never")
        }
    }

    struct Echo;

    impl ToolPlugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn execute(&self, command: &str, args: &Value) -> Result<Value, PluginError> {
            Ok(json!({ "command": command, "args": args }))
        }
    }

    #[test]
    fn ir_operations_default_to_unsupported() {
        let handler = Handler::format(Opaque);
        let err = handler
            .handle(PluginRequest::ExtractIr(OutputArgs::new("/x", "/y")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(err.to_string(), "format opaque does not support extract-ir");

        let err = handler
            .handle(PluginRequest::EmitNative(EmitArgs::new("/x.ir.json", "/y")))
            .unwrap_err();
        assert_eq!(err.to_string(), "format opaque does not support emit-native");
    }

    #[test]
    fn missing_output_dir_is_argument_error() {
        let handler = Handler::format(Opaque);
        let args = OutputArgs {
            input: InputArgs::path("/x"),
            output_dir: None,
        };
        let err = handler.handle(PluginRequest::Ingest(args)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn format_plugin_rejects_tool_commands() {
        let handler = Handler::format(Opaque);
        let err = handler
            .handle(PluginRequest::Execute {
                command: "list-sources".to_string(),
                args: Value::Null,
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownCommand);
    }

    #[test]
    fn tool_receives_operation_names_as_commands() {
        let handler = Handler::tool(Echo);
        assert_eq!(handler.kind(), PluginKind::Tool);
        let resp = handler
            .handle(PluginRequest::Detect(InputArgs::path("/x")))
            .unwrap();
        assert_eq!(
            resp,
            PluginResponse::Execute(json!({"command": "detect", "args": {"path": "/x"}}))
        );
    }
}
