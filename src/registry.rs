//! Plugin manifests and the plugin registry.
//!
//! Every plugin, built-in or external, is described by a [`Manifest`].
//! External plugins ship theirs as `plugin.json` in their own directory
//! under one of the configured manifest directories:
//!
//! ```text
//! plugins/
//!   sword/
//!     plugin.json        # {"plugin_id": "sword", "kind": "format", ...}
//!     sword-plugin       # entrypoint, resolved relative to plugin.json
//!   calibre/
//!     plugin.json
//! ```
//!
//! The registry maps plugin IDs to a manifest and the [`Transport`] that
//! reaches the plugin. It is built once at startup, shared behind an
//! `Arc`, and read concurrently; registering an ID that already exists
//! replaces the earlier entry, so manifest directories loaded later
//! override built-ins.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::config::Config;
use crate::formats;
use crate::traits::Handler;
use crate::transport::{EmbeddedTransport, ExternalTransport, Transport};

/// File name of an external plugin's manifest.
pub const MANIFEST_FILE: &str = "plugin.json";

/// Entrypoint recorded for plugins compiled into this binary.
pub const BUILTIN_ENTRYPOINT: &str = "builtin";

// ═══════════════════════════════════════════════════════════════════════
// Manifest Types
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Format,
    Tool,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginKind::Format => "format",
            PluginKind::Tool => "tool",
        })
    }
}

/// Formats a plugin reads and writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Static description of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub plugin_id: String,
    pub version: String,
    pub kind: PluginKind,
    /// Program to run, or [`BUILTIN_ENTRYPOINT`].
    pub entrypoint: String,
    /// Extra arguments passed to the entrypoint before the request is
    /// written to its stdin.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl Manifest {
    /// Manifest for a plugin compiled into this binary.
    pub fn builtin(plugin_id: &str, kind: PluginKind, description: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            kind,
            entrypoint: BUILTIN_ENTRYPOINT.to_string(),
            args: Vec::new(),
            description: Some(description.to_string()),
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, inputs: &[&str], outputs: &[&str]) -> Self {
        self.capabilities = Capabilities {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        };
        self
    }

    pub fn is_builtin(&self) -> bool {
        self.entrypoint == BUILTIN_ENTRYPOINT
    }

    /// Reject manifests that could never be dispatched to.
    pub fn validate(&self) -> Result<()> {
        if self.plugin_id.is_empty()
            || !self
                .plugin_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        {
            bail!(
                "plugin_id '{}' must be non-empty and use only [A-Za-z0-9._-]",
                self.plugin_id
            );
        }
        if !is_semver(&self.version) {
            bail!(
                "plugin '{}' has version '{}', expected MAJOR.MINOR.PATCH",
                self.plugin_id,
                self.version
            );
        }
        if self.entrypoint.trim().is_empty() {
            bail!("plugin '{}' has an empty entrypoint", self.plugin_id);
        }
        Ok(())
    }
}

fn is_semver(version: &str) -> bool {
    let core = version.split(['-', '+']).next().unwrap_or_default();
    let parts: Vec<&str> = core.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

// ═══════════════════════════════════════════════════════════════════════
// Manifest Loading
// ═══════════════════════════════════════════════════════════════════════

/// Load and validate a `plugin.json`.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    let manifest: Manifest = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse manifest: {}", path.display()))?;
    manifest.validate()?;
    Ok(manifest)
}

/// Every valid manifest one level below `dir`, with the directory it was
/// found in. Invalid manifests are skipped with a warning.
pub fn discover_manifests(dir: &Path) -> Vec<(Manifest, PathBuf)> {
    let mut found = Vec::new();
    let read = match std::fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "cannot read plugin directory");
            return found;
        }
    };

    let mut subdirs: Vec<PathBuf> = read
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    for subdir in subdirs {
        let manifest_path = subdir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }
        match load_manifest(&manifest_path) {
            Ok(manifest) => found.push((manifest, subdir)),
            Err(e) => tracing::warn!(path = %manifest_path.display(), "skipping plugin: {:#}", e),
        }
    }
    found
}

/// Resolve an entrypoint relative to the directory holding its manifest.
///
/// Bare program names with no file beside the manifest are left for
/// `PATH` lookup.
pub fn resolve_entrypoint(base_dir: &Path, entrypoint: &str) -> PathBuf {
    let path = Path::new(entrypoint);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let local = base_dir.join(path);
    if entrypoint.contains(['/', '\\']) || local.exists() {
        local
    } else {
        path.to_path_buf()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// A registered plugin: what it is and how to reach it.
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub manifest: Manifest,
    pub transport: Arc<dyn Transport>,
}

impl fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("manifest", &self.manifest)
            .field("transport", &self.transport.kind())
            .finish()
    }
}

/// Plugin ID → manifest + transport.
///
/// Interior locking lets a shared registry be read from many tasks while
/// plugins are registered or cleared.
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<String, RegisteredPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a registry holding every built-in plugin, embedded.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for (manifest, handler) in formats::builtins() {
            registry.register_handler(manifest, handler);
        }
        registry
    }

    /// Built-ins plus every external plugin found in the configured
    /// manifest directories, minus disabled IDs.
    pub fn from_config(config: &Config) -> Self {
        let registry = Self::with_builtins();
        let timeout = Duration::from_secs(config.dispatch.timeout_secs);

        for dir in &config.plugins.manifest_dirs {
            for (manifest, base_dir) in discover_manifests(dir) {
                registry.register_external(manifest, &base_dir, timeout);
            }
        }
        for id in &config.plugins.disabled {
            if registry.unregister(id).is_some() {
                tracing::debug!(plugin = %id, "plugin disabled by config");
            }
        }
        registry
    }

    /// Register a plugin, returning the manifest it replaced.
    pub fn register(&self, manifest: Manifest, transport: Arc<dyn Transport>) -> Option<Manifest> {
        let id = manifest.plugin_id.clone();
        let kind = transport.kind();
        let previous = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), RegisteredPlugin { manifest, transport })
            .map(|p| p.manifest);
        match &previous {
            Some(old) => tracing::info!(
                plugin = %id,
                transport = %kind,
                replaced = %old.entrypoint,
                "replaced plugin registration"
            ),
            None => tracing::debug!(plugin = %id, transport = %kind, "registered plugin"),
        }
        previous
    }

    /// Register an in-process plugin.
    pub fn register_handler(&self, manifest: Manifest, handler: Handler) -> Option<Manifest> {
        self.register(manifest, Arc::new(EmbeddedTransport::new(handler)))
    }

    /// Register a subprocess plugin whose manifest lives in `base_dir`.
    pub fn register_external(
        &self,
        manifest: Manifest,
        base_dir: &Path,
        timeout: Duration,
    ) -> Option<Manifest> {
        let program = resolve_entrypoint(base_dir, &manifest.entrypoint);
        let transport = ExternalTransport::new(
            manifest.plugin_id.clone(),
            program,
            manifest.args.clone(),
            timeout,
        );
        self.register(manifest, Arc::new(transport))
    }

    pub fn unregister(&self, plugin_id: &str) -> Option<Manifest> {
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(plugin_id)
            .map(|p| p.manifest)
    }

    pub fn lookup(&self, plugin_id: &str) -> Option<RegisteredPlugin> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(plugin_id)
            .cloned()
    }

    /// All plugins, sorted by ID.
    pub fn plugins(&self) -> Vec<RegisteredPlugin> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// All manifests, sorted by ID.
    pub fn list(&self) -> Vec<Manifest> {
        self.plugins().into_iter().map(|p| p.manifest).collect()
    }

    pub fn clear(&self) {
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportKind;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, name: &str, body: &str) {
        let plugin_dir = dir.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn parse_manifest() {
        let json = r#"{
            "plugin_id": "sword",
            "version": "0.2.1",
            "kind": "format",
            "entrypoint": "./sword-plugin",
            "capabilities": { "inputs": ["sword"], "outputs": ["ir"] }
        }"#;
        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.kind, PluginKind::Format);
        assert_eq!(manifest.capabilities.inputs, vec!["sword"]);
        assert!(manifest.args.is_empty());
        manifest.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_fields() {
        let mut m = Manifest::builtin("usfm", PluginKind::Format, "x");
        m.version = "1.0".to_string();
        assert!(m.validate().is_err());
        m.version = "1.0.0-beta.1".to_string();
        assert!(m.validate().is_ok());
        m.plugin_id = "bad id".to_string();
        assert!(m.validate().is_err());
    }

    #[test]
    fn discover_skips_invalid_manifests() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "good",
            r#"{"plugin_id":"good","version":"1.0.0","kind":"tool","entrypoint":"run.sh"}"#,
        );
        write_manifest(tmp.path(), "broken", "{ not json");
        std::fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let found = discover_manifests(tmp.path());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0.plugin_id, "good");
        assert_eq!(found[0].1, tmp.path().join("good"));
    }

    #[test]
    fn entrypoint_resolution() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("run.sh"), "").unwrap();
        assert_eq!(resolve_entrypoint(tmp.path(), "run.sh"), tmp.path().join("run.sh"));
        assert_eq!(
            resolve_entrypoint(tmp.path(), "bin/plugin"),
            tmp.path().join("bin/plugin")
        );
        assert_eq!(resolve_entrypoint(tmp.path(), "python3"), PathBuf::from("python3"));
        assert_eq!(resolve_entrypoint(tmp.path(), "/usr/bin/env"), PathBuf::from("/usr/bin/env"));
    }

    #[test]
    fn builtins_are_sorted_and_embedded() {
        let registry = PluginRegistry::with_builtins();
        let ids: Vec<String> = registry.list().into_iter().map(|m| m.plugin_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(ids.contains(&"usfm".to_string()));
        assert!(ids.contains(&"usx".to_string()));
        let usfm = registry.lookup("usfm").unwrap();
        assert_eq!(usfm.transport.kind(), TransportKind::Embedded);
    }

    #[test]
    fn later_registration_wins() {
        let registry = PluginRegistry::with_builtins();
        let tmp = TempDir::new().unwrap();
        let mut manifest = Manifest::builtin("usfm", PluginKind::Format, "external usfm");
        manifest.entrypoint = "usfm-plugin".to_string();
        let replaced =
            registry.register_external(manifest, tmp.path(), Duration::from_secs(5));
        assert!(replaced.unwrap().is_builtin());
        let usfm = registry.lookup("usfm").unwrap();
        assert_eq!(usfm.transport.kind(), TransportKind::External);
    }

    #[test]
    fn from_config_applies_dirs_and_disabled() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            "sword",
            r#"{"plugin_id":"sword","version":"1.0.0","kind":"format","entrypoint":"sword-plugin"}"#,
        );
        let mut config = Config::default();
        config.plugins.manifest_dirs = vec![tmp.path().to_path_buf()];
        config.plugins.disabled = vec!["calibre".to_string()];

        let registry = PluginRegistry::from_config(&config);
        assert!(registry.lookup("sword").is_some());
        assert!(registry.lookup("calibre").is_none());
        assert!(registry.lookup("usx").is_some());

        registry.clear();
        assert!(registry.is_empty());
    }
}
