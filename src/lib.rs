//! # Codex Bridge
//!
//! Plugin dispatch, an intermediate representation (IR), and
//! content-addressed ingestion for Bible text and apparatus formats.
//!
//! Format plugins detect, ingest, list, and convert native files; tool
//! plugins wrap external utilities. Callers address plugins by ID through a
//! [`dispatch::Dispatcher`] and never see whether the plugin runs
//! in-process or as a subprocess speaking the stdio protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐
//! │  CLI (cdx)   │──▶│  Dispatcher  │──▶│ Registry → Transport │
//! │ batch/convert│   │  span + gate │   │ embedded │ external  │
//! └──────────────┘   └──────────────┘   └─────┬──────────┬─────┘
//!                                             ▼          ▼
//!                                       ┌──────────┐ ┌─────────────┐
//!                                       │ formats/ │ │ subprocess  │
//!                                       │ usfm usx │ │ (server.rs) │
//!                                       └────┬─────┘ └─────────────┘
//!                                            ▼
//!                                   blob store  +  <id>.ir.json
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cdx detect ./GEN.usfm                 # which plugin claims it
//! cdx ingest usfm ./GEN.usfm            # store the bytes, print the digest
//! cdx extract-ir usfm ./GEN.usfm -o out # write out/GEN.ir.json
//! cdx emit-native usx out/GEN.ir.json -o out
//! cdx batch ./modules                   # detect + ingest a whole tree
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Plugin error taxonomy |
//! | [`cas`] | Content-addressed blob store |
//! | [`protocol`] | Typed requests, results, and the wire format |
//! | [`traits`] | `FormatPlugin` / `ToolPlugin` extension traits |
//! | [`registry`] | Manifests and the plugin registry |
//! | [`transport`] | Embedded and external transports |
//! | [`dispatch`] | Caller-facing dispatcher |
//! | [`server`] | Stdio host for serving a plugin externally |
//! | [`formats`] | Built-in format and tool plugins |
//! | [`convert`] | Extract-then-emit conversion |
//! | [`ingest`] | Concurrent batch ingestion |
//! | [`plugins`] | Plugin listing |
//! | [`progress`] | Batch progress on stderr |
//!
//! The IR data model lives in the `codex-bridge-core` crate and is
//! re-exported here as [`ir`].

pub use codex_bridge_core as ir;

pub mod cas;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod formats;
pub mod ingest;
pub mod plugins;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod traits;
pub mod transport;
