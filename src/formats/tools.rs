//! Built-in tool plugins.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::PluginError;
use crate::traits::ToolPlugin;

/// A tool whose capability is declared but whose implementation lives in
/// an external plugin. Every command fails with an application error
/// until an external plugin with the same ID replaces it.
pub struct ExternalOnlyTool {
    name: String,
}

impl ExternalOnlyTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ToolPlugin for ExternalOnlyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, command: &str, _args: &Value) -> Result<Value, PluginError> {
        Err(PluginError::Application(format!(
            "{} command '{}' requires external plugin",
            self.name, command
        )))
    }
}

/// A SWORD module repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub name: &'static str,
    pub kind: &'static str,
    pub host: &'static str,
    pub directory: &'static str,
}

pub const SOURCES: &[Source] = &[
    Source {
        name: "CrossWire",
        kind: "FTP",
        host: "ftp.crosswire.org",
        directory: "/pub/sword/raw",
    },
    Source {
        name: "CrossWire Beta",
        kind: "FTP",
        host: "ftp.crosswire.org",
        directory: "/pub/sword/betaraw",
    },
    Source {
        name: "eBible.org",
        kind: "FTP",
        host: "ftp.ebible.org",
        directory: "/sword",
    },
    Source {
        name: "IBT",
        kind: "FTP",
        host: "ftp.ibt.org.ru",
        directory: "/pub/modsword/raw",
    },
    Source {
        name: "Xiphos",
        kind: "FTP",
        host: "ftp.xiphos.org",
        directory: "/sword",
    },
];

/// Lists known module repositories. Fetching and installing modules is
/// left to external tooling.
pub struct RepositoryTool;

impl ToolPlugin for RepositoryTool {
    fn name(&self) -> &str {
        "sword-repo"
    }

    fn execute(&self, command: &str, _args: &Value) -> Result<Value, PluginError> {
        match command {
            "list-sources" => Ok(json!({ "sources": SOURCES })),
            other => Err(PluginError::UnknownCommand(other.to_string())),
        }
    }
}
