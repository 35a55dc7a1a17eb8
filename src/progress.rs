//! Batch progress on stderr.
//!
//! `cdx batch` announces how many files it found, reports every file as it
//! finishes with the plugin that claimed it and what happened, and closes
//! with a tally. Stdout carries only the final JSON summary.
//!
//! ```text
//! batch ./modules: 3 file(s) to process
//! [1/3] ingested    gen.usfm  usfm -> GEN  3fa1c09e77d2
//! [2/3] undetected  notes.bin
//! [3/3] failed      nt/jhn.usx  usx: failed to read input: permission denied
//! batch ./modules: 1 ingested, 1 undetected, 1 failed
//! ```

use serde::Serialize;
use std::io::Write;

use crate::ingest::BatchSummary;

/// What became of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<'a> {
    Ingested {
        plugin: &'a str,
        artifact_id: &'a str,
        blob_sha256: &'a str,
    },
    /// Dry run: claimed by a plugin, nothing stored.
    Detected { plugin: &'a str },
    Undetected,
    Failed { plugin: &'a str, error: &'a str },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent<'a> {
    Scanned {
        root: &'a str,
        files: usize,
    },
    /// `n` files of `total` are done; files finish in any order.
    File {
        n: usize,
        total: usize,
        path: &'a str,
        outcome: Outcome<'a>,
    },
    Finished {
        root: &'a str,
        ingested: usize,
        undetected: usize,
        failed: usize,
    },
}

impl<'a> BatchEvent<'a> {
    pub fn finished(summary: &'a BatchSummary) -> Self {
        BatchEvent::Finished {
            root: &summary.root,
            ingested: summary.ingested,
            undetected: summary.undetected,
            failed: summary.failed,
        }
    }
}

pub trait BatchObserver: Send + Sync {
    fn observe(&self, event: &BatchEvent<'_>);
}

pub fn human_line(event: &BatchEvent<'_>) -> String {
    match event {
        BatchEvent::Scanned { root, files } => {
            format!("batch {}: {} file(s) to process", root, files)
        }
        BatchEvent::File {
            n,
            total,
            path,
            outcome,
        } => {
            let counter = format!("[{:>w$}/{}]", n, total, w = total.to_string().len());
            match outcome {
                Outcome::Ingested {
                    plugin,
                    artifact_id,
                    blob_sha256,
                } => format!(
                    "{} ingested    {}  {} -> {}  {}",
                    counter,
                    path,
                    plugin,
                    artifact_id,
                    blob_sha256.get(..12).unwrap_or(*blob_sha256)
                ),
                Outcome::Detected { plugin } => {
                    format!("{} detected    {}  {} (dry run)", counter, path, plugin)
                }
                Outcome::Undetected => format!("{} undetected  {}", counter, path),
                Outcome::Failed { plugin, error } => {
                    format!("{} failed      {}  {}: {}", counter, path, plugin, error)
                }
            }
        }
        BatchEvent::Finished {
            root,
            ingested,
            undetected,
            failed,
        } => format!(
            "batch {}: {} ingested, {} undetected, {} failed",
            root, ingested, undetected, failed
        ),
    }
}

/// One line per event for a person watching the terminal.
pub struct HumanProgress;

impl BatchObserver for HumanProgress {
    fn observe(&self, event: &BatchEvent<'_>) {
        let _ = writeln!(std::io::stderr().lock(), "{}", human_line(event));
    }
}

/// One JSON object per event, for wrapping tools.
pub struct JsonLines;

impl BatchObserver for JsonLines {
    fn observe(&self, event: &BatchEvent<'_>) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

pub struct Silent;

impl BatchObserver for Silent {
    fn observe(&self, _event: &BatchEvent<'_>) {}
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// `human` when stderr is a terminal, else `off`.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn observer(&self) -> Box<dyn BatchObserver> {
        match self {
            ProgressMode::Off => Box::new(Silent),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonLines),
        }
    }
}
