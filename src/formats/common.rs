//! Helpers shared by the built-in format plugins.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use codex_bridge_core::{Corpus, LossClass, LossReport};
use walkdir::WalkDir;

use crate::cas::BlobStore;
use crate::error::PluginError;
use crate::protocol::{
    DetectResult, EmitNativeResult, EnumerateEntry, EnumerateResult, ExtractIrResult, IngestResult,
};

/// Bytes read when sniffing for format markers.
pub const SNIFF_LIMIT: u64 = 64 * 1024;

/// File stem, or the whole name when there is no stem.
pub fn default_artifact_id(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Full file name, extension included.
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Case-insensitive check against multi-part extensions such as `tar.gz`.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    let name = file_name(path).to_ascii_lowercase();
    extensions
        .iter()
        .any(|ext| name.ends_with(&format!(".{}", ext)))
}

pub fn read_input(path: &Path) -> Result<Vec<u8>, PluginError> {
    fs::read(path).map_err(|e| PluginError::io("read input", e))
}

/// `bytes` as text. Invalid UTF-8 is replaced with U+FFFD and noted on
/// `report`; the caller still preserves the raw bytes.
pub fn decode_text<'a>(bytes: &'a [u8], report: &mut LossReport) -> Cow<'a, str> {
    let text = String::from_utf8_lossy(bytes);
    if matches!(text, Cow::Owned(_)) {
        report.warn("input is not valid UTF-8; invalid sequences were replaced with U+FFFD");
    }
    text
}

/// First bytes of a regular file, or the negative detection explaining
/// why there are none.
pub fn sniff_file(path: &Path) -> Result<Vec<u8>, DetectResult> {
    let meta = fs::metadata(path)
        .map_err(|e| DetectResult::not_found(format!("cannot stat input: {}", e)))?;
    if !meta.is_file() {
        return Err(DetectResult::not_found("not a regular file"));
    }
    let file = fs::File::open(path)
        .map_err(|e| DetectResult::not_found(format!("cannot read input: {}", e)))?;
    let mut head = Vec::new();
    file.take(SNIFF_LIMIT)
        .read_to_end(&mut head)
        .map_err(|e| DetectResult::not_found(format!("cannot read input: {}", e)))?;
    Ok(head)
}

/// Put `bytes` into the blob store at `output_dir` and describe them.
pub fn store(
    path: &Path,
    bytes: &[u8],
    output_dir: &Path,
    artifact_id: String,
    format: &str,
) -> Result<IngestResult, PluginError> {
    let blob_sha256 = BlobStore::new(output_dir).put(bytes)?;
    let mut metadata = BTreeMap::new();
    metadata.insert("format".to_string(), format.to_string());
    metadata.insert("file_name".to_string(), file_name(path));
    Ok(IngestResult {
        artifact_id,
        blob_sha256,
        size_bytes: bytes.len() as u64,
        metadata,
    })
}

/// A single file lists as itself; a directory lists recursively.
pub fn enumerate_path(path: &Path) -> Result<EnumerateResult, PluginError> {
    let meta = fs::metadata(path).map_err(|e| PluginError::io("stat input", e))?;
    if meta.is_dir() {
        return walk_dir(path);
    }
    Ok(EnumerateResult {
        entries: vec![EnumerateEntry {
            path: file_name(path),
            size_bytes: meta.len(),
            is_dir: false,
            metadata: None,
        }],
    })
}

/// Every entry under `root`, relative and `/`-separated, in name order.
pub fn walk_dir(root: &Path) -> Result<EnumerateResult, PluginError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| PluginError::io("walk directory", e.into()))?;
        let meta = entry
            .metadata()
            .map_err(|e| PluginError::io("stat entry", e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let metadata = meta.modified().ok().map(|m| {
            let modified: DateTime<Utc> = m.into();
            BTreeMap::from([("modified".to_string(), modified.to_rfc3339())])
        });
        entries.push(EnumerateEntry {
            path: rel,
            size_bytes: if meta.is_dir() { 0 } else { meta.len() },
            is_dir: meta.is_dir(),
            metadata,
        });
    }
    Ok(EnumerateResult { entries })
}

/// Make an ID safe to use as a file name.
fn file_safe(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "corpus".to_string()
    } else {
        cleaned
    }
}

/// Write `<output_dir>/<id>.ir.json`.
pub fn write_corpus(corpus: &Corpus, output_dir: &Path) -> Result<PathBuf, PluginError> {
    fs::create_dir_all(output_dir).map_err(|e| PluginError::io("create output directory", e))?;
    let path = output_dir.join(format!("{}.ir.json", file_safe(&corpus.id)));
    let json = corpus.to_json_pretty()?;
    fs::write(&path, json).map_err(|e| PluginError::io("write IR file", e))?;
    tracing::debug!(
        path = %path.display(),
        documents = corpus.documents.len(),
        blocks = corpus.block_count(),
        "wrote IR"
    );
    Ok(path)
}

/// Read and validate an IR file.
pub fn read_corpus(ir_path: &Path) -> Result<Corpus, PluginError> {
    let bytes = fs::read(ir_path).map_err(|e| PluginError::io("read IR file", e))?;
    Ok(Corpus::from_json_slice(&bytes)?)
}

/// Finish an extraction: settle the loss class, write the IR, and
/// report.
pub fn finish_extract(
    mut corpus: Corpus,
    structural: LossClass,
    mut report: LossReport,
    output_dir: &Path,
) -> Result<ExtractIrResult, PluginError> {
    let loss_class = corpus.settle_loss_class(structural.worst(report.loss_class));
    report.loss_class = loss_class;
    let ir_path = write_corpus(&corpus, output_dir)?;
    Ok(ExtractIrResult {
        ir_path,
        loss_class,
        loss_report: report.into_option(),
    })
}

/// Emit `format` from the IR at `ir_path`.
///
/// Raw bytes preserved for `format` are written back verbatim; the
/// result is `L0` when they hash to the corpus's `source_hash`. Otherwise
/// `regenerate` rebuilds the file from structure and records anything it
/// drops in the report.
pub fn emit<F>(
    ir_path: &Path,
    output_dir: &Path,
    format: &str,
    extension: &str,
    regenerate: F,
) -> Result<EmitNativeResult, PluginError>
where
    F: FnOnce(&Corpus, &mut LossReport) -> Result<Vec<u8>, PluginError>,
{
    let corpus = read_corpus(ir_path)?;
    let mut report = LossReport::new(corpus.source_format.clone(), format, LossClass::L1);

    let bytes = match corpus.raw_bytes(format)? {
        Some(raw) => {
            if corpus.is_lossless_for(format) {
                report.loss_class = LossClass::L0;
            } else {
                report.warn(format!(
                    "preserved {} bytes do not match the corpus source_hash",
                    format
                ));
            }
            raw
        }
        None => {
            report.warn(format!("regenerated {} from structured IR", format));
            if corpus.loss_class == LossClass::L2 {
                report.warn("source extraction was already lossy (L2)");
                report.loss_class = LossClass::L2;
            }
            regenerate(&corpus, &mut report)?
        }
    };

    fs::create_dir_all(output_dir).map_err(|e| PluginError::io("create output directory", e))?;
    let output_path = output_dir.join(format!("{}.{}", file_safe(&corpus.id), extension));
    fs::write(&output_path, &bytes).map_err(|e| PluginError::io("write output", e))?;

    let loss_class = report.loss_class;
    Ok(EmitNativeResult {
        output_path,
        format: format.to_string(),
        loss_class,
        loss_report: report.into_option(),
    })
}
