//! # Codex Bridge CLI (`cdx`)
//!
//! The `cdx` binary drives the plugin dispatcher: detect formats, ingest
//! files into the blob store, list containers, convert through the IR,
//! and run tool plugins. Results print as pretty JSON on stdout; logs and
//! progress go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! cdx --config ./config/cdx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cdx detect <path>` | Find the plugin that claims a file |
//! | `cdx ingest <plugin> <path>` | Store a file in the blob store |
//! | `cdx enumerate <plugin> <path>` | List a file, directory, or archive |
//! | `cdx extract-ir <plugin> <path> -o <dir>` | Write `<dir>/<id>.ir.json` |
//! | `cdx emit-native <plugin> <ir> -o <dir>` | Write `<dir>/<id>.<ext>` from IR |
//! | `cdx convert <path> --to <plugin> -o <dir>` | Extract and emit in one step |
//! | `cdx batch <dir>` | Detect and ingest a whole tree |
//! | `cdx plugins` | List registered plugins |
//! | `cdx tool <plugin> <command>` | Run a tool-plugin command |
//! | `cdx plugin serve <id>` | Serve a built-in plugin over stdio |
//!
//! ## Examples
//!
//! ```bash
//! # Which format is this?
//! cdx detect ./KJV/GEN.usfm
//!
//! # Round-trip USFM through the IR
//! cdx extract-ir usfm ./GEN.usfm -o ./out
//! cdx emit-native usfm ./out/GEN.ir.json -o ./out
//!
//! # Ingest every recognised file under ./modules, four at a time
//! cdx batch ./modules --progress human
//!
//! # Known SWORD repositories
//! cdx tool sword-repo list-sources
//! ```

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use codex_bridge::config::{self, Config};
use codex_bridge::convert;
use codex_bridge::dispatch::Dispatcher;
use codex_bridge::formats;
use codex_bridge::ingest::{self, BatchOptions};
use codex_bridge::plugins;
use codex_bridge::progress::ProgressMode;
use codex_bridge::server;

/// Codex Bridge CLI: plugin dispatch, IR conversion, and
/// content-addressed ingestion for Bible text formats.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults.
#[derive(Parser)]
#[command(
    name = "cdx",
    about = "Codex Bridge: detect, ingest, and convert Bible text formats through plugins",
    version,
    long_about = "Codex Bridge dispatches requests to format and tool plugins, built in or \
    external, stores ingested files by SHA-256, and converts between formats through a \
    loss-classified intermediate representation."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/cdx.toml`. Dispatch, store, and plugin
    /// directory settings are read from this file.
    #[arg(long, global = true, default_value = "./config/cdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the format of a file or directory.
    ///
    /// Without `--plugin`, every format plugin is asked in ID order and
    /// the first positive answer wins.
    Detect {
        path: PathBuf,

        /// Ask only this plugin.
        #[arg(long)]
        plugin: Option<String>,
    },

    /// Store a file in the blob store.
    Ingest {
        plugin: String,
        path: PathBuf,

        /// Blob store root. Defaults to `[store].root`.
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,
    },

    /// List the entries of a file, directory, or archive.
    Enumerate { plugin: String, path: PathBuf },

    /// Parse a native file into an IR file.
    ExtractIr {
        plugin: String,
        path: PathBuf,

        #[arg(long, short = 'o')]
        output_dir: PathBuf,
    },

    /// Write an IR file back out in a plugin's native format.
    EmitNative {
        plugin: String,
        ir_path: PathBuf,

        #[arg(long, short = 'o')]
        output_dir: PathBuf,
    },

    /// Convert a file to another format through the IR.
    Convert {
        path: PathBuf,

        /// Target plugin.
        #[arg(long)]
        to: String,

        /// Source plugin. Detected when omitted.
        #[arg(long)]
        from: Option<String>,

        #[arg(long, short = 'o')]
        output_dir: PathBuf,
    },

    /// Detect and ingest every file under a directory.
    ///
    /// Runs up to `[dispatch].max_concurrency` files at once. Hidden files
    /// and `.git` are always skipped.
    Batch {
        root: PathBuf,

        /// Only ingest paths matching these globs (relative to the root).
        #[arg(long)]
        include: Vec<String>,

        /// Skip paths matching these globs.
        #[arg(long)]
        exclude: Vec<String>,

        /// Blob store root. Defaults to `[store].root`.
        #[arg(long, short = 'o')]
        output_dir: Option<PathBuf>,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,

        /// Detect only; store nothing.
        #[arg(long)]
        dry_run: bool,

        /// Progress on stderr. Defaults to `human` on a terminal, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List registered plugins and whether they can run.
    Plugins {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Run a tool-plugin command.
    Tool {
        plugin: String,
        command: String,

        /// Arguments as `key=value` pairs.
        #[arg(long = "arg", value_parser = parse_key_val)]
        args: Vec<(String, String)>,

        /// Arguments as a JSON object. Merged under any `--arg` pairs.
        #[arg(long)]
        json: Option<String>,
    },

    /// Run a built-in plugin as an external one.
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Print shell completions.
    Completions { shell: clap_complete::Shell },
}

#[derive(Subcommand)]
enum PluginAction {
    /// Answer one request from stdin on stdout.
    ///
    /// Exits non-zero when the answer is an error response.
    Serve { plugin: String },
}

/// Parse a `key=value` pair for `--arg`.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn tool_args(pairs: Vec<(String, String)>, json: Option<String>) -> Result<Value> {
    let mut args = match json {
        Some(text) => {
            let value: Value = serde_json::from_str(&text).context("--json is not valid JSON")?;
            match value {
                Value::Object(map) => map,
                _ => bail!("--json must be a JSON object"),
            }
        }
        None => serde_json::Map::new(),
    };
    for (key, value) in pairs {
        args.insert(key, Value::String(value));
    }
    Ok(Value::Object(args))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn store_root<'a>(cfg: &'a Config, output_dir: &'a Option<PathBuf>) -> &'a Path {
    output_dir.as_deref().unwrap_or(&cfg.store.root)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Commands that don't require config
    match &cli.command {
        Commands::Plugin {
            action: PluginAction::Serve { plugin },
        } => {
            let handler = formats::builtin_handler(plugin)
                .with_context(|| format!("no built-in plugin '{}'", plugin))?;
            let ok = tokio::task::spawn_blocking(move || server::serve_stdio(&handler))
                .await
                .context("plugin server panicked")?
                .context("failed to write response")?;
            if !ok {
                std::process::exit(1);
            }
            return Ok(());
        }
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "cdx", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_or_default(&cli.config)?;
    let dispatcher = Dispatcher::from_config(&cfg);

    match cli.command {
        Commands::Detect { path, plugin } => match plugin {
            Some(id) => print_json(&dispatcher.detect(&id, &path).await?)?,
            None => match dispatcher.detect_any(&path).await {
                Some((id, result)) => print_json(&json!({ "plugin": id, "result": result }))?,
                None => print_json(&json!({
                    "plugin": null,
                    "result": {
                        "detected": false,
                        "reason": "no registered plugin recognised the input"
                    }
                }))?,
            },
        },
        Commands::Ingest {
            plugin,
            path,
            output_dir,
        } => {
            let root = store_root(&cfg, &output_dir);
            print_json(&dispatcher.ingest(&plugin, &path, root).await?)?;
        }
        Commands::Enumerate { plugin, path } => {
            print_json(&dispatcher.enumerate(&plugin, &path).await?)?;
        }
        Commands::ExtractIr {
            plugin,
            path,
            output_dir,
        } => {
            print_json(&dispatcher.extract_ir(&plugin, &path, &output_dir).await?)?;
        }
        Commands::EmitNative {
            plugin,
            ir_path,
            output_dir,
        } => {
            print_json(&dispatcher.emit_native(&plugin, &ir_path, &output_dir).await?)?;
        }
        Commands::Convert {
            path,
            to,
            from,
            output_dir,
        } => {
            let result =
                convert::convert(&dispatcher, &path, from.as_deref(), &to, &output_dir).await?;
            print_json(&result)?;
        }
        Commands::Batch {
            root,
            include,
            exclude,
            output_dir,
            limit,
            dry_run,
            progress,
        } => {
            let options = BatchOptions {
                include,
                exclude,
                output_dir: store_root(&cfg, &output_dir).to_path_buf(),
                max_concurrency: cfg.dispatch.max_concurrency,
                limit,
                dry_run,
            };
            let observer = progress.unwrap_or_else(ProgressMode::default_for_tty).observer();
            let summary = ingest::run_batch(&dispatcher, &root, &options, observer.as_ref()).await?;
            print_json(&summary)?;
        }
        Commands::Plugins { json } => {
            let statuses = plugins::plugin_statuses(&dispatcher);
            if json {
                print_json(&statuses)?;
            } else {
                plugins::write_table(std::io::stdout().lock(), &statuses)?;
            }
        }
        Commands::Tool {
            plugin,
            command,
            args,
            json,
        } => {
            let args = tool_args(args, json)?;
            print_json(&dispatcher.execute(&plugin, &command, args).await?)?;
        }
        Commands::Plugin { .. } | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
