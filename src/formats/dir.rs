//! Directory-shaped inputs, such as an unpacked module.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::common;
use crate::error::PluginError;
use crate::protocol::{DetectResult, EnumerateResult, IngestResult};
use crate::traits::FormatPlugin;

pub const FORMAT: &str = "dir";

pub struct DirPlugin;

impl FormatPlugin for DirPlugin {
    fn format(&self) -> &str {
        FORMAT
    }

    fn detect(&self, path: &Path) -> DetectResult {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => DetectResult::found(FORMAT, "input is a directory"),
            Ok(_) => DetectResult::not_found("not a directory"),
            Err(e) => DetectResult::not_found(format!("cannot stat input: {}", e)),
        }
    }

    fn artifact_id(&self, path: &Path, _bytes: &[u8]) -> String {
        common::file_name(path)
    }

    /// Stores the first regular, non-hidden file in name order.
    fn ingest(&self, path: &Path, output_dir: &Path) -> Result<IngestResult, PluginError> {
        let entry = first_file(path)?;
        let bytes = common::read_input(&entry)?;
        let mut result = common::store(path, &bytes, output_dir, self.artifact_id(path, &bytes), FORMAT)?;
        let relative = entry.strip_prefix(path).unwrap_or(&entry);
        result
            .metadata
            .insert("entry".to_string(), relative.to_string_lossy().replace('\\', "/"));
        Ok(result)
    }

    fn enumerate(&self, path: &Path) -> Result<EnumerateResult, PluginError> {
        common::walk_dir(path)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn first_file(root: &Path) -> Result<PathBuf, PluginError> {
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| PluginError::io("walk directory", e.into()))?;
        if entry.file_type().is_file() {
            return Ok(entry.into_path());
        }
    }
    Err(PluginError::io(
        "find a file to ingest",
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} contains no regular files", root.display()),
        ),
    ))
}
