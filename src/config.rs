//! TOML configuration.
//!
//! ```toml
//! [dispatch]
//! external_enabled = false   # allow subprocess plugins
//! timeout_secs = 60          # per external invocation
//! max_concurrency = 4        # parallel ingests in `cdx batch`
//!
//! [store]
//! root = "./data/blobs"
//!
//! [plugins]
//! manifest_dirs = ["./plugins"]
//! disabled = ["calibre"]
//! ```
//!
//! Every section is optional. A missing config file yields the defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default)]
    pub external_enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            external_enabled: false,
            timeout_secs: default_timeout_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

fn default_store_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PluginsConfig {
    #[serde(default)]
    pub manifest_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub disabled: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.dispatch.timeout_secs == 0 {
        anyhow::bail!("dispatch.timeout_secs must be > 0");
    }
    if config.dispatch.max_concurrency == 0 {
        anyhow::bail!("dispatch.max_concurrency must be >= 1");
    }
    if config.store.root.as_os_str().is_empty() {
        anyhow::bail!("store.root must not be empty");
    }

    // Relative manifest dirs are relative to the config file.
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for dir in &mut config.plugins.manifest_dirs {
        if dir.is_relative() {
            *dir = base.join(&*dir);
        }
    }

    Ok(config)
}

/// [`load_config`], or the defaults when `path` does not exist.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cdx.toml");
        std::fs::write(&path, "").unwrap();
        let config = load_config(&path).unwrap();
        assert!(!config.dispatch.external_enabled);
        assert_eq!(config.dispatch.timeout_secs, 60);
        assert_eq!(config.dispatch.max_concurrency, 4);
        assert_eq!(config.store.root, PathBuf::from("./data/blobs"));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = load_or_default(Path::new("/nonexistent/cdx.toml")).unwrap();
        assert!(config.plugins.manifest_dirs.is_empty());
    }

    #[test]
    fn manifest_dirs_resolve_against_config_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cdx.toml");
        std::fs::write(
            &path,
            "[dispatch]\nexternal_enabled = true\n[plugins]\nmanifest_dirs = [\"plugins\", \"/opt/cdx\"]\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert!(config.dispatch.external_enabled);
        assert_eq!(
            config.plugins.manifest_dirs,
            vec![tmp.path().join("plugins"), PathBuf::from("/opt/cdx")]
        );
    }

    #[test]
    fn rejects_zero_limits() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cdx.toml");
        std::fs::write(&path, "[dispatch]\ntimeout_secs = 0\n").unwrap();
        assert!(load_config(&path).is_err());
        std::fs::write(&path, "[dispatch]\nmax_concurrency = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }
}
