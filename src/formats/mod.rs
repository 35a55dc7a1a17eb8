//! Built-in plugins.
//!
//! | Plugin | Kind | Operations |
//! |--------|------|------------|
//! | `usfm` | format | all five; L0 round trip via preserved raw bytes |
//! | `usx` | format | all five; L0 round trip via preserved raw bytes |
//! | `dir` | format | detect, ingest (first file), enumerate |
//! | `zip`, `tar`, `tar.gz`, `tar.xz` | format | detect, ingest, enumerate without extraction |
//! | `sword-repo` | tool | `list-sources` |
//! | `calibre`, `hugo`, `libxml2` | tool | declared only; every command needs an external plugin |
//!
//! Every built-in can also be served over stdio with
//! `cdx plugin serve <id>`, which is how the same code runs as an
//! external plugin.

pub mod archive;
pub mod common;
pub mod dir;
pub mod text;
pub mod tools;
pub mod usfm;
pub mod usx;

use crate::registry::{Manifest, PluginKind};
use crate::traits::Handler;

/// Manifest and handler for every built-in plugin.
pub fn builtins() -> Vec<(Manifest, Handler)> {
    let format = |id: &str, description: &str, inputs: &[&str], outputs: &[&str]| {
        Manifest::builtin(id, PluginKind::Format, description).with_capabilities(inputs, outputs)
    };
    let tool = |id: &str, description: &str, inputs: &[&str], outputs: &[&str]| {
        Manifest::builtin(id, PluginKind::Tool, description).with_capabilities(inputs, outputs)
    };

    vec![
        (
            format("usfm", "Unified Standard Format Markers", &["usfm", "sfm"], &["ir", "usfm"]),
            Handler::format(usfm::UsfmPlugin),
        ),
        (
            format("usx", "Unified Scripture XML", &["usx"], &["ir", "usx"]),
            Handler::format(usx::UsxPlugin),
        ),
        (
            format("dir", "Directory of source files", &["dir"], &["blob"]),
            Handler::format(dir::DirPlugin),
        ),
        (
            format("zip", "Zip archive", &["zip"], &["blob"]),
            Handler::format(archive::ArchivePlugin::new(archive::ArchiveKind::Zip)),
        ),
        (
            format("tar", "Tar archive", &["tar"], &["blob"]),
            Handler::format(archive::ArchivePlugin::new(archive::ArchiveKind::Tar)),
        ),
        (
            format("tar.gz", "Gzip-compressed tar archive", &["tar.gz", "tgz"], &["blob"]),
            Handler::format(archive::ArchivePlugin::new(archive::ArchiveKind::TarGz)),
        ),
        (
            format("tar.xz", "Xz-compressed tar archive", &["tar.xz", "txz"], &["blob"]),
            Handler::format(archive::ArchivePlugin::new(archive::ArchiveKind::TarXz)),
        ),
        (
            tool("sword-repo", "SWORD module repository sources", &[], &["sources"]),
            Handler::tool(tools::RepositoryTool),
        ),
        (
            tool("calibre", "Ebook conversion via calibre", &["epub", "mobi"], &["epub", "pdf"]),
            Handler::tool(tools::ExternalOnlyTool::new("calibre")),
        ),
        (
            tool("hugo", "Static site generation via hugo", &["markdown"], &["html"]),
            Handler::tool(tools::ExternalOnlyTool::new("hugo")),
        ),
        (
            tool("libxml2", "XML validation via xmllint", &["xml"], &["report"]),
            Handler::tool(tools::ExternalOnlyTool::new("libxml2")),
        ),
    ]
}

/// The in-process handler for a built-in plugin ID.
pub fn builtin_handler(plugin_id: &str) -> Option<Handler> {
    builtins()
        .into_iter()
        .find(|(manifest, _)| manifest.plugin_id == plugin_id)
        .map(|(_, handler)| handler)
}
