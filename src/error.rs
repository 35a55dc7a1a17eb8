//! Error taxonomy shared by every plugin and both transports.
//!
//! Callers match on [`ErrorKind`] rather than on transport details: an
//! unsupported-operation error raised in-process and the same error
//! reported by an external plugin over stdio both come back with
//! `kind() == ErrorKind::Unsupported` and the same message.
//!
//! | Kind | Meaning |
//! |------|---------|
//! | `argument` | A required request field is absent or has the wrong type |
//! | `io` | stat/read/mkdir/write failed (`failed to <verb>: <cause>`) |
//! | `unsupported` | The format structurally cannot perform the operation |
//! | `unknown_command` | The request named a command no plugin understands |
//! | `parse` | Native content or IR JSON is malformed |
//! | `application` | An external plugin diagnosed a problem without a code |
//! | `not_registered` | No plugin with that ID is in the registry |
//! | `external_disabled` | External dispatch is switched off |
//! | `transport` | The subprocess crashed, timed out, or produced no parseable reply |
//!
//! Negative detection is deliberately *not* an error; see
//! [`crate::protocol::DetectResult`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a [`PluginError`], stable across transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Io,
    Unsupported,
    UnknownCommand,
    Parse,
    Application,
    NotRegistered,
    ExternalDisabled,
    Transport,
}

impl ErrorKind {
    /// Wire code carried in the `code` field of an error response.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Argument => "argument",
            ErrorKind::Io => "io",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::UnknownCommand => "unknown_command",
            ErrorKind::Parse => "parse",
            ErrorKind::Application => "application",
            ErrorKind::NotRegistered => "not_registered",
            ErrorKind::ExternalDisabled => "external_disabled",
            ErrorKind::Transport => "transport",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ErrorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "argument" => ErrorKind::Argument,
            "io" => ErrorKind::Io,
            "unsupported" => ErrorKind::Unsupported,
            "unknown_command" => ErrorKind::UnknownCommand,
            "parse" => ErrorKind::Parse,
            "application" => ErrorKind::Application,
            "not_registered" => ErrorKind::NotRegistered,
            "external_disabled" => ErrorKind::ExternalDisabled,
            "transport" => ErrorKind::Transport,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid request: {0}")]
    Argument(String),

    #[error("failed to {verb}: {source}")]
    Io {
        verb: String,
        #[source]
        source: std::io::Error,
    },

    #[error("format {format} does not support {operation}")]
    Unsupported { format: String, operation: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("failed to parse {format}: {message}")]
    Parse { format: String, message: String },

    /// A plugin-level diagnosis with no more specific kind.
    #[error("{0}")]
    Application(String),

    /// An error reported by an external plugin, carried as its message.
    #[error("{message}")]
    Reported { kind: ErrorKind, message: String },

    #[error("no plugin registered with id '{0}'")]
    NotRegistered(String),

    #[error("external plugin '{0}' cannot run: external dispatch is disabled")]
    ExternalDisabled(String),

    #[error("transport failure for plugin '{plugin}': {message}")]
    Transport { plugin: String, message: String },

    #[error("plugin '{plugin}' timed out after {timeout:?}")]
    Timeout { plugin: String, timeout: Duration },
}

impl PluginError {
    pub fn io(verb: impl Into<String>, source: std::io::Error) -> Self {
        PluginError::Io {
            verb: verb.into(),
            source,
        }
    }

    pub fn unsupported(format: impl Into<String>, operation: impl fmt::Display) -> Self {
        PluginError::Unsupported {
            format: format.into(),
            operation: operation.to_string(),
        }
    }

    pub fn parse(format: impl Into<String>, message: impl fmt::Display) -> Self {
        PluginError::Parse {
            format: format.into(),
            message: message.to_string(),
        }
    }

    pub fn transport(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        PluginError::Transport {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::Argument(_) => ErrorKind::Argument,
            PluginError::Io { .. } => ErrorKind::Io,
            PluginError::Unsupported { .. } => ErrorKind::Unsupported,
            PluginError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            PluginError::Parse { .. } => ErrorKind::Parse,
            PluginError::Application(_) => ErrorKind::Application,
            PluginError::Reported { kind, .. } => *kind,
            PluginError::NotRegistered(_) => ErrorKind::NotRegistered,
            PluginError::ExternalDisabled(_) => ErrorKind::ExternalDisabled,
            PluginError::Transport { .. } | PluginError::Timeout { .. } => ErrorKind::Transport,
        }
    }

    /// Rebuild an error from an external plugin's `{"error", "code"}` pair.
    ///
    /// A missing or unrecognised code is an application failure: the
    /// plugin diagnosed something, we just don't know its category.
    pub fn reported(message: impl Into<String>, code: Option<&str>) -> Self {
        let kind = code
            .and_then(|c| c.parse::<ErrorKind>().ok())
            .filter(|k| !matches!(k, ErrorKind::Transport))
            .unwrap_or(ErrorKind::Application);
        PluginError::Reported {
            kind,
            message: message.into(),
        }
    }

    /// `true` when no plugin ever produced a diagnosis.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

impl From<codex_bridge_core::IrError> for PluginError {
    fn from(err: codex_bridge_core::IrError) -> Self {
        PluginError::parse("IR", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_message_carries_cause_chain() {
        let err = PluginError::io(
            "read input",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(err.to_string(), "failed to read input: no such file");
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn reported_error_keeps_message_and_kind() {
        let local = PluginError::unsupported("zip", "extract-ir");
        let remote = PluginError::reported(local.to_string(), Some(local.kind().code()));
        assert_eq!(remote.to_string(), local.to_string());
        assert_eq!(remote.kind(), ErrorKind::Unsupported);
        assert!(remote.to_string().contains("does not support"));
    }

    #[test]
    fn uncoded_report_is_application() {
        let err = PluginError::reported("bad marker", None);
        assert_eq!(err.kind(), ErrorKind::Application);
        assert!(!err.is_transport());
        let forged = PluginError::reported("x", Some("transport"));
        assert_eq!(forged.kind(), ErrorKind::Application);
    }

    #[test]
    fn codes_roundtrip() {
        for kind in [
            ErrorKind::Argument,
            ErrorKind::Io,
            ErrorKind::Unsupported,
            ErrorKind::UnknownCommand,
            ErrorKind::Parse,
            ErrorKind::Application,
        ] {
            assert_eq!(kind.code().parse::<ErrorKind>(), Ok(kind));
        }
    }
}
