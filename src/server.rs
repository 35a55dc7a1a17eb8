//! Stdio plugin host.
//!
//! `cdx plugin serve <id>` turns any built-in plugin into an external
//! one: it reads a single request from stdin, answers with a single JSON
//! document on stdout, and exits non-zero if the answer is an error.
//! Logging goes to stderr only, so stdout carries nothing but the reply.

use std::io::{Read, Write};

use crate::error::PluginError;
use crate::protocol::{IpcRequest, IpcResponse, PluginRequest};
use crate::traits::Handler;

/// Answer one raw request.
pub fn respond(handler: &Handler, input: &[u8]) -> IpcResponse {
    match answer(handler, input) {
        Ok(result) => IpcResponse::ok(result),
        Err(e) => {
            tracing::debug!(kind = %e.kind(), "request failed: {}", e);
            IpcResponse::failure(&e)
        }
    }
}

fn answer(handler: &Handler, input: &[u8]) -> Result<serde_json::Value, PluginError> {
    let ipc: IpcRequest = serde_json::from_slice(input)
        .map_err(|e| PluginError::Argument(format!("malformed request: {}", e)))?;
    let request = PluginRequest::from_ipc(ipc, handler.kind())?;
    let response = handler.handle(request)?;
    response
        .to_value()
        .map_err(|e| PluginError::Application(format!("failed to encode result: {}", e)))
}

/// Serve one request from `input` to `output`. Returns `true` on success.
pub fn serve<R: Read, W: Write>(handler: &Handler, mut input: R, mut output: W) -> std::io::Result<bool> {
    let mut buf = Vec::new();
    input.read_to_end(&mut buf)?;
    let response = respond(handler, &buf);
    serde_json::to_writer(&mut output, &response)?;
    output.write_all(b"\n")?;
    output.flush()?;
    Ok(response.error.is_none())
}

/// [`serve`] over the process's stdin and stdout.
pub fn serve_stdio(handler: &Handler) -> std::io::Result<bool> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(handler, stdin.lock(), stdout.lock())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats;
    use crate::protocol::Status;
    use serde_json::json;
    use tempfile::TempDir;

    fn usfm() -> Handler {
        formats::builtin_handler("usfm").unwrap()
    }

    #[test]
    fn serves_detect() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gen.usfm");
        std::fs::write(&path, "\\id GEN\n").unwrap();
        let request = json!({"command": "detect", "args": {"path": path}});
        let mut out = Vec::new();
        let ok = serve(&usfm(), request.to_string().as_bytes(), &mut out).unwrap();
        assert!(ok);
        let response: IpcResponse = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.result.unwrap()["detected"], true);
    }

    #[test]
    fn malformed_request_is_argument_error() {
        let response = respond(&usfm(), b"{ nope");
        assert_eq!(response.status, Status::Error);
        assert_eq!(response.code.as_deref(), Some("argument"));
    }

    #[test]
    fn unknown_command_is_reported() {
        let mut out = Vec::new();
        let ok = serve(
            &usfm(),
            json!({"command": "explode", "args": {}}).to_string().as_bytes(),
            &mut out,
        )
        .unwrap();
        assert!(!ok);
        let response: IpcResponse = serde_json::from_slice(&out).unwrap();
        assert_eq!(response.code.as_deref(), Some("unknown_command"));
        assert_eq!(response.error.as_deref(), Some("unknown command: explode"));
    }
}
