//! Typed requests and responses for the plugin contract, and their JSON
//! wire form.
//!
//! Both transports speak in [`PluginRequest`] / [`PluginResponse`]. The
//! external transport additionally lowers them to the stdio wire shapes:
//!
//! ```text
//! Request:  {"command": "<detect|ingest|enumerate|extract-ir|emit-native>", "args": {...}}
//! Response: {"status": "ok", "result": {...}}
//!           {"status": "error", "error": "<message>", "code": "<kind>"}
//! ```
//!
//! Commands are a closed [`Operation`] enum; anything else sent to a
//! format plugin is an unknown-command error. Tool plugins accept any
//! command string and receive it through [`PluginRequest::Execute`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use codex_bridge_core::{LossClass, LossReport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cas::BlobStore;
use crate::error::PluginError;
use crate::registry::PluginKind;

// ═══════════════════════════════════════════════════════════════════════
// Operations
// ═══════════════════════════════════════════════════════════════════════

/// The five format-plugin operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Detect,
    Ingest,
    Enumerate,
    ExtractIr,
    EmitNative,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Detect,
        Operation::Ingest,
        Operation::Enumerate,
        Operation::ExtractIr,
        Operation::EmitNative,
    ];

    /// Wire command name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Detect => "detect",
            Operation::Ingest => "ingest",
            Operation::Enumerate => "enumerate",
            Operation::ExtractIr => "extract-ir",
            Operation::EmitNative => "emit-native",
        }
    }

    /// Name of the in-flight state for logging (`Detecting`, `Emitting`, ...).
    pub fn state(&self) -> &'static str {
        match self {
            Operation::Detect => "Detecting",
            Operation::Ingest => "Ingesting",
            Operation::Enumerate => "Enumerating",
            Operation::ExtractIr => "Extracting",
            Operation::EmitNative => "Emitting",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| PluginError::UnknownCommand(s.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Arguments
// ═══════════════════════════════════════════════════════════════════════

/// Where a request's input lives: a filesystem `path`, or a blob in a
/// content-addressed store (`blob_hash` + `cas_dir`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cas_dir: Option<PathBuf>,
}

impl InputArgs {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn blob(blob_hash: impl Into<String>, cas_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: None,
            blob_hash: Some(blob_hash.into()),
            cas_dir: Some(cas_dir.into()),
        }
    }

    /// The concrete file to operate on. `path` wins when both forms are given.
    pub fn resolve(&self) -> Result<PathBuf, PluginError> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        match (&self.blob_hash, &self.cas_dir) {
            (Some(hash), Some(dir)) => BlobStore::new(dir).path(hash),
            (Some(_), None) => Err(PluginError::Argument(
                "blob_hash requires cas_dir".to_string(),
            )),
            _ => Err(PluginError::Argument("path is required".to_string())),
        }
    }
}

/// Input plus a destination directory (Ingest, ExtractIR).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputArgs {
    #[serde(flatten)]
    pub input: InputArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl OutputArgs {
    pub fn new(path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: InputArgs::path(path),
            output_dir: Some(output_dir.into()),
        }
    }

    pub fn output_dir(&self) -> Result<&Path, PluginError> {
        required(&self.output_dir, "output_dir")
    }
}

/// Arguments for EmitNative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl EmitArgs {
    pub fn new(ir_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ir_path: Some(ir_path.into()),
            output_dir: Some(output_dir.into()),
        }
    }

    pub fn ir_path(&self) -> Result<&Path, PluginError> {
        required(&self.ir_path, "ir_path")
    }

    pub fn output_dir(&self) -> Result<&Path, PluginError> {
        required(&self.output_dir, "output_dir")
    }
}

fn required<'a>(field: &'a Option<PathBuf>, name: &str) -> Result<&'a Path, PluginError> {
    field
        .as_deref()
        .ok_or_else(|| PluginError::Argument(format!("{} is required", name)))
}

// ═══════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════

/// Outcome of Detect. A negative result is a value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectResult {
    pub detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DetectResult {
    pub fn found(format: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            detected: true,
            format: Some(format.into()),
            reason: Some(reason.into()),
        }
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self {
            detected: false,
            format: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub artifact_id: String,
    pub blob_sha256: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerateEntry {
    pub path: String,
    pub size_bytes: u64,
    pub is_dir: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerateResult {
    pub entries: Vec<EnumerateEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractIrResult {
    pub ir_path: PathBuf,
    pub loss_class: LossClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_report: Option<LossReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitNativeResult {
    pub output_path: PathBuf,
    pub format: String,
    pub loss_class: LossClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_report: Option<LossReport>,
}

// ═══════════════════════════════════════════════════════════════════════
// Requests / responses
// ═══════════════════════════════════════════════════════════════════════

/// A single plugin invocation, independent of transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginRequest {
    Detect(InputArgs),
    Ingest(OutputArgs),
    Enumerate(InputArgs),
    ExtractIr(OutputArgs),
    EmitNative(EmitArgs),
    /// Tool-plugin command.
    Execute { command: String, args: Value },
}

impl PluginRequest {
    /// `None` for tool commands.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            PluginRequest::Detect(_) => Some(Operation::Detect),
            PluginRequest::Ingest(_) => Some(Operation::Ingest),
            PluginRequest::Enumerate(_) => Some(Operation::Enumerate),
            PluginRequest::ExtractIr(_) => Some(Operation::ExtractIr),
            PluginRequest::EmitNative(_) => Some(Operation::EmitNative),
            PluginRequest::Execute { .. } => None,
        }
    }

    pub fn command(&self) -> &str {
        match self {
            PluginRequest::Execute { command, .. } => command,
            other => other.operation().map(|op| op.as_str()).unwrap_or_default(),
        }
    }

    /// JSON form of the arguments.
    pub fn args_value(&self) -> Result<Value, PluginError> {
        let value = match self {
            PluginRequest::Detect(a) | PluginRequest::Enumerate(a) => serde_json::to_value(a),
            PluginRequest::Ingest(a) | PluginRequest::ExtractIr(a) => serde_json::to_value(a),
            PluginRequest::EmitNative(a) => serde_json::to_value(a),
            PluginRequest::Execute { args, .. } => Ok(args.clone()),
        };
        value.map_err(|e| PluginError::Argument(e.to_string()))
    }

    pub fn to_ipc(&self) -> Result<IpcRequest, PluginError> {
        Ok(IpcRequest {
            command: self.command().to_string(),
            args: self.args_value()?,
        })
    }

    /// Decode a wire request for a plugin of `kind`.
    ///
    /// Format plugins reject commands outside [`Operation`]; tool plugins
    /// take every command as an `Execute`.
    pub fn from_ipc(request: IpcRequest, kind: PluginKind) -> Result<Self, PluginError> {
        if kind == PluginKind::Tool {
            return Ok(PluginRequest::Execute {
                command: request.command,
                args: request.args,
            });
        }
        let op: Operation = request.command.parse()?;
        let args = if request.args.is_null() {
            Value::Object(Default::default())
        } else {
            request.args
        };
        Ok(match op {
            Operation::Detect => PluginRequest::Detect(decode_args(args)?),
            Operation::Ingest => PluginRequest::Ingest(decode_args(args)?),
            Operation::Enumerate => PluginRequest::Enumerate(decode_args(args)?),
            Operation::ExtractIr => PluginRequest::ExtractIr(decode_args(args)?),
            Operation::EmitNative => PluginRequest::EmitNative(decode_args(args)?),
        })
    }
}

fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, PluginError> {
    serde_json::from_value(args).map_err(|e| PluginError::Argument(e.to_string()))
}

/// Result of a single invocation; the variant mirrors the request.
#[derive(Debug, Clone, PartialEq)]
pub enum PluginResponse {
    Detect(DetectResult),
    Ingest(IngestResult),
    Enumerate(EnumerateResult),
    ExtractIr(ExtractIrResult),
    EmitNative(EmitNativeResult),
    Execute(Value),
}

impl PluginResponse {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            PluginResponse::Detect(r) => serde_json::to_value(r),
            PluginResponse::Ingest(r) => serde_json::to_value(r),
            PluginResponse::Enumerate(r) => serde_json::to_value(r),
            PluginResponse::ExtractIr(r) => serde_json::to_value(r),
            PluginResponse::EmitNative(r) => serde_json::to_value(r),
            PluginResponse::Execute(v) => Ok(v.clone()),
        }
    }

    /// Decode a wire `result` as the response to `request`.
    pub fn from_value(request: &PluginRequest, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match request.operation() {
            Some(Operation::Detect) => PluginResponse::Detect(serde_json::from_value(value)?),
            Some(Operation::Ingest) => PluginResponse::Ingest(serde_json::from_value(value)?),
            Some(Operation::Enumerate) => PluginResponse::Enumerate(serde_json::from_value(value)?),
            Some(Operation::ExtractIr) => PluginResponse::ExtractIr(serde_json::from_value(value)?),
            Some(Operation::EmitNative) => {
                PluginResponse::EmitNative(serde_json::from_value(value)?)
            }
            None => PluginResponse::Execute(value),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Wire shapes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcRequest {
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IpcResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            status: Status::Ok,
            result: Some(result),
            error: None,
            code: None,
        }
    }

    pub fn failure(err: &PluginError) -> Self {
        Self {
            status: Status::Error,
            result: None,
            error: Some(err.to_string()),
            code: Some(err.kind().code().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn wire_request_shape() {
        let req = PluginRequest::ExtractIr(OutputArgs::new("/in/gen.usfm", "/out"));
        let ipc = serde_json::to_value(req.to_ipc().unwrap()).unwrap();
        assert_eq!(
            ipc,
            json!({"command": "extract-ir", "args": {"path": "/in/gen.usfm", "output_dir": "/out"}})
        );
    }

    #[test]
    fn unknown_command_for_format_plugin() {
        let ipc = IpcRequest {
            command: "transmogrify".to_string(),
            args: json!({}),
        };
        let err = PluginRequest::from_ipc(ipc, PluginKind::Format).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownCommand);
    }

    #[test]
    fn tool_accepts_any_command() {
        let ipc = IpcRequest {
            command: "list-sources".to_string(),
            args: Value::Null,
        };
        let req = PluginRequest::from_ipc(ipc, PluginKind::Tool).unwrap();
        assert_eq!(req.command(), "list-sources");
        assert_eq!(req.operation(), None);
    }

    #[test]
    fn missing_path_is_argument_error() {
        let ipc = IpcRequest {
            command: "detect".to_string(),
            args: Value::Null,
        };
        let req = PluginRequest::from_ipc(ipc, PluginKind::Format).unwrap();
        let PluginRequest::Detect(args) = req else {
            panic!("expected detect");
        };
        assert_eq!(args.resolve().unwrap_err().kind(), ErrorKind::Argument);
    }

    #[test]
    fn wrong_typed_args_are_argument_errors() {
        let ipc = IpcRequest {
            command: "ingest".to_string(),
            args: json!({"path": 7}),
        };
        let err = PluginRequest::from_ipc(ipc, PluginKind::Format).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }

    #[test]
    fn blob_input_resolves_to_store_path() {
        let hash = "ab".repeat(32);
        let args = InputArgs::blob(hash.clone(), "/cas");
        assert_eq!(
            args.resolve().unwrap(),
            PathBuf::from("/cas").join("ab").join(&hash)
        );
        let half = InputArgs {
            blob_hash: Some(hash),
            ..Default::default()
        };
        assert_eq!(half.resolve().unwrap_err().kind(), ErrorKind::Argument);
    }

    #[test]
    fn error_response_carries_code() {
        let resp = IpcResponse::failure(&PluginError::unsupported("zip", Operation::ExtractIr));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["code"], "unsupported");
        assert_eq!(json["error"], "format zip does not support extract-ir");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn response_decodes_by_request_kind() {
        let req = PluginRequest::Detect(InputArgs::path("/x"));
        let resp = PluginResponse::from_value(&req, json!({"detected": false, "reason": "no markers found"}))
            .unwrap();
        assert_eq!(
            resp,
            PluginResponse::Detect(DetectResult::not_found("no markers found"))
        );
    }
}
