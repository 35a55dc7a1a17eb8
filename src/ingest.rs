//! Batch ingestion.
//!
//! Walks a directory, picks a format plugin for each file by detection,
//! and ingests every detected file into the blob store. Files are
//! processed concurrently, bounded by `dispatch.max_concurrency`; one
//! file failing does not stop the batch.

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::dispatch::Dispatcher;
use crate::progress::{BatchEvent, BatchObserver, Outcome};

/// Patterns skipped in every batch, on top of any configured excludes.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/.*"];

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Glob patterns a relative path must match; empty means everything.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Blob store that receives ingested files.
    pub output_dir: PathBuf,
    pub max_concurrency: usize,
    pub limit: Option<usize>,
    /// Detect only; store nothing.
    pub dry_run: bool,
}

/// Outcome for one file.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    pub fn outcome(&self) -> Outcome<'_> {
        match (&self.plugin, &self.error, &self.blob_sha256) {
            (None, _, _) => Outcome::Undetected,
            (Some(plugin), Some(error), _) => Outcome::Failed { plugin, error },
            (Some(plugin), None, Some(digest)) => Outcome::Ingested {
                plugin,
                artifact_id: self.artifact_id.as_deref().unwrap_or_default(),
                blob_sha256: digest,
            },
            (Some(plugin), None, None) => Outcome::Detected { plugin },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub root: String,
    pub scanned: usize,
    pub ingested: usize,
    pub undetected: usize,
    pub failed: usize,
    pub items: Vec<BatchItem>,
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Regular files under `root` that pass the include and exclude
/// patterns, as `(relative, absolute)` pairs in path order.
pub fn scan(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<(String, PathBuf)>> {
    let include_set = build_globset(include)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude_set.is_match(&relative) {
            continue;
        }
        if !include.is_empty() && !include_set.is_match(&relative) {
            continue;
        }
        files.push((relative, path.to_path_buf()));
    }

    files.sort();
    Ok(files)
}

async fn process(
    dispatcher: Dispatcher,
    relative: String,
    path: PathBuf,
    output_dir: PathBuf,
    dry_run: bool,
) -> BatchItem {
    let mut item = BatchItem {
        path: relative,
        plugin: None,
        artifact_id: None,
        blob_sha256: None,
        size_bytes: None,
        error: None,
    };
    let Some((plugin, _)) = dispatcher.detect_any(&path).await else {
        tracing::debug!(path = %item.path, "no plugin claimed file");
        return item;
    };
    item.plugin = Some(plugin.clone());
    if dry_run {
        return item;
    }
    match dispatcher.ingest(&plugin, &path, &output_dir).await {
        Ok(result) => {
            item.artifact_id = Some(result.artifact_id);
            item.blob_sha256 = Some(result.blob_sha256);
            item.size_bytes = Some(result.size_bytes);
        }
        Err(e) => {
            tracing::warn!(path = %item.path, plugin = %plugin, "ingest failed: {}", e);
            item.error = Some(e.to_string());
        }
    }
    item
}

/// Detect and ingest every file under `root`.
pub async fn run_batch(
    dispatcher: &Dispatcher,
    root: &Path,
    options: &BatchOptions,
    observer: &dyn BatchObserver,
) -> Result<BatchSummary> {
    let root_label = root.display().to_string();
    let mut files = scan(root, &options.include, &options.exclude)?;
    if let Some(limit) = options.limit {
        files.truncate(limit);
    }
    let total = files.len();
    tracing::info!(root = %root_label, files = total, "starting batch");
    observer.observe(&BatchEvent::Scanned {
        root: &root_label,
        files: total,
    });

    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let mut workers = JoinSet::new();
    for (relative, path) in files {
        let semaphore = semaphore.clone();
        let dispatcher = dispatcher.clone();
        let output_dir = options.output_dir.clone();
        let dry_run = options.dry_run;
        workers.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            process(dispatcher, relative, path, output_dir, dry_run).await
        });
    }

    let mut items = Vec::with_capacity(total);
    while let Some(joined) = workers.join_next().await {
        let item = joined.context("batch worker panicked")?;
        observer.observe(&BatchEvent::File {
            n: items.len() + 1,
            total,
            path: &item.path,
            outcome: item.outcome(),
        });
        items.push(item);
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));

    let (mut ingested, mut undetected, mut failed) = (0, 0, 0);
    for item in &items {
        match item.outcome() {
            Outcome::Ingested { .. } => ingested += 1,
            Outcome::Undetected => undetected += 1,
            Outcome::Failed { .. } => failed += 1,
            Outcome::Detected { .. } => {}
        }
    }
    tracing::info!(ingested, undetected, failed, "batch finished");

    let summary = BatchSummary {
        root: root_label,
        scanned: items.len(),
        ingested,
        undetected,
        failed,
        items,
    };
    observer.observe(&BatchEvent::finished(&summary));
    Ok(summary)
}
