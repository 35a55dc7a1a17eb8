//! Container formats: zip, tar, and gzip- or xz-compressed tar.
//!
//! Archives are ingested whole and listed without extracting anything.
//! Zip listings come from the central directory; tar listings come from a
//! single streaming pass over the headers, decompressing on the fly.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::EntryType;
use xz2::read::XzDecoder;

use super::common;
use crate::error::PluginError;
use crate::protocol::{DetectResult, EnumerateEntry, EnumerateResult};
use crate::traits::FormatPlugin;

const BLOCK: usize = 512;
const USTAR_MAGIC: &[u8] = b"ustar";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarXz,
}

impl ArchiveKind {
    pub fn format(&self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Tar => "tar",
            ArchiveKind::TarGz => "tar.gz",
            ArchiveKind::TarXz => "tar.xz",
        }
    }

    fn extensions(&self) -> &'static [&'static str] {
        match self {
            ArchiveKind::Zip => &["zip"],
            ArchiveKind::Tar => &["tar"],
            ArchiveKind::TarGz => &["tar.gz", "tgz"],
            ArchiveKind::TarXz => &["tar.xz", "txz"],
        }
    }
}

pub struct ArchivePlugin {
    kind: ArchiveKind,
}

impl ArchivePlugin {
    pub fn new(kind: ArchiveKind) -> Self {
        Self { kind }
    }

    fn sniff(&self, head: &[u8]) -> Option<&'static str> {
        match self.kind {
            ArchiveKind::Zip => (head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06"))
                .then_some("found zip signature"),
            ArchiveKind::Tar => is_ustar(head).then_some("found ustar header"),
            ArchiveKind::TarGz => (head.starts_with(GZIP_MAGIC)
                && is_ustar(&first_block(GzDecoder::new(head))))
            .then_some("found gzip-compressed ustar header"),
            ArchiveKind::TarXz => (head.starts_with(XZ_MAGIC)
                && is_ustar(&first_block(XzDecoder::new(head))))
            .then_some("found xz-compressed ustar header"),
        }
    }
}

/// Up to one tar block of decompressed output. The sniff buffer may cut
/// the stream short, so a decode error after the first block is ignored.
fn first_block<R: Read>(decoder: R) -> Vec<u8> {
    let mut first = Vec::with_capacity(BLOCK);
    let _ = decoder.take(BLOCK as u64).read_to_end(&mut first);
    first
}

fn is_ustar(block: &[u8]) -> bool {
    block.len() >= 262 && &block[257..262] == USTAR_MAGIC
}

impl FormatPlugin for ArchivePlugin {
    fn format(&self) -> &str {
        self.kind.format()
    }

    fn detect(&self, path: &Path) -> DetectResult {
        let head = match common::sniff_file(path) {
            Ok(head) => head,
            Err(negative) => return negative,
        };
        if let Some(reason) = self.sniff(&head) {
            return DetectResult::found(self.format(), reason);
        }
        let extensions = self.kind.extensions();
        if common::has_extension(path, extensions) {
            let matched = extensions
                .iter()
                .map(|e| format!(".{}", e))
                .collect::<Vec<_>>()
                .join("/");
            return DetectResult::found(self.format(), format!("matched {} extension", matched));
        }
        DetectResult::not_found(match self.kind {
            ArchiveKind::Zip => "no zip signature",
            ArchiveKind::Tar => "no ustar header",
            ArchiveKind::TarGz => "no gzip-compressed tar stream",
            ArchiveKind::TarXz => "no xz-compressed tar stream",
        })
    }

    /// File name with the archive extension removed.
    fn artifact_id(&self, path: &Path, _bytes: &[u8]) -> String {
        let name = common::file_name(path);
        let lower = name.to_ascii_lowercase();
        for ext in self.kind.extensions() {
            let suffix = format!(".{}", ext);
            if lower.ends_with(&suffix) && lower.len() > suffix.len() {
                return name[..name.len() - suffix.len()].to_string();
            }
        }
        common::default_artifact_id(path)
    }

    fn enumerate(&self, path: &Path) -> Result<EnumerateResult, PluginError> {
        let file = File::open(path).map_err(|e| PluginError::io("open archive", e))?;
        let entries = match self.kind {
            ArchiveKind::Zip => list_zip(file)?,
            ArchiveKind::Tar => list_tar(BufReader::new(file), "tar")?,
            ArchiveKind::TarGz => list_tar(GzDecoder::new(BufReader::new(file)), "tar.gz")?,
            ArchiveKind::TarXz => list_tar(XzDecoder::new(BufReader::new(file)), "tar.xz")?,
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "listed archive");
        Ok(EnumerateResult { entries })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Zip
// ═══════════════════════════════════════════════════════════════════════

fn list_zip(file: File) -> Result<Vec<EnumerateEntry>, PluginError> {
    let mut archive =
        zip::ZipArchive::new(BufReader::new(file)).map_err(|e| PluginError::parse("zip", e))?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| PluginError::parse("zip", e))?;
        let metadata = BTreeMap::from([
            ("compressed_size".to_string(), entry.compressed_size().to_string()),
            ("method".to_string(), format!("{:?}", entry.compression())),
        ]);
        entries.push(EnumerateEntry {
            path: entry.name().trim_end_matches('/').to_string(),
            size_bytes: entry.size(),
            is_dir: entry.is_dir(),
            metadata: Some(metadata),
        });
    }
    Ok(entries)
}

// ═══════════════════════════════════════════════════════════════════════
// Tar
// ═══════════════════════════════════════════════════════════════════════

fn entry_type(kind: EntryType) -> &'static str {
    match kind {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => "file",
        EntryType::Link => "hardlink",
        EntryType::Symlink => "symlink",
        EntryType::Char => "char",
        EntryType::Block => "block",
        EntryType::Directory => "dir",
        EntryType::Fifo => "fifo",
        _ => "other",
    }
}

/// One pass over the headers; entry data is skipped, never unpacked.
/// GNU long names and link names and pax path/size records are applied
/// by the reader.
fn list_tar<R: Read>(reader: R, format: &str) -> Result<Vec<EnumerateEntry>, PluginError> {
    let mut archive = tar::Archive::new(reader);
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(|e| PluginError::parse(format, e))? {
        let entry = entry.map_err(|e| {
            PluginError::parse(format, format!("{} after {} entries", e, entries.len()))
        })?;
        let kind = entry.header().entry_type();
        if kind == EntryType::XGlobalHeader {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| PluginError::parse(format, e))?
            .to_string_lossy()
            .replace('\\', "/");
        let is_dir = kind.is_dir() || name.ends_with('/');

        let mut metadata = BTreeMap::from([(
            "type".to_string(),
            entry_type(if is_dir { EntryType::Directory } else { kind }).to_string(),
        )]);
        if let Some(target) = entry.link_name().map_err(|e| PluginError::parse(format, e))? {
            metadata.insert("link".to_string(), target.to_string_lossy().into_owned());
        }

        entries.push(EnumerateEntry {
            path: name.trim_end_matches('/').to_string(),
            size_bytes: if is_dir { 0 } else { entry.size() },
            is_dir,
            metadata: Some(metadata),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::{self, Write};
    use tempfile::TempDir;

    fn header(kind: EntryType, size: u64) -> tar::Header {
        let mut h = tar::Header::new_gnu();
        h.set_entry_type(kind);
        h.set_size(size);
        h.set_mode(0o644);
        h.set_mtime(0);
        h
    }

    fn long_path() -> String {
        format!("{}/deep.txt", "n".repeat(120))
    }

    /// A directory, a config file, a file whose path needs a GNU long-name
    /// header, and a symlink whose target needs a long-link header.
    fn sample_tar() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_data(&mut header(EntryType::Directory, 0), "mods.d/", io::empty())
            .unwrap();
        let conf = b"[KJV]\nDataPath=./modules/\n";
        builder
            .append_data(
                &mut header(EntryType::Regular, conf.len() as u64),
                "mods.d/kjv.conf",
                &conf[..],
            )
            .unwrap();
        builder
            .append_data(&mut header(EntryType::Regular, 3), long_path(), &b"abc"[..])
            .unwrap();
        builder
            .append_link(&mut header(EntryType::Symlink, 0), "modules/current", long_path())
            .unwrap();
        builder.into_inner().unwrap()
    }

    fn xz(bytes: &[u8]) -> Vec<u8> {
        let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
        enc.write_all(bytes).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn lists_tar_entries() {
        let entries = list_tar(&sample_tar()[..], "tar").unwrap();
        let paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                "mods.d".to_string(),
                "mods.d/kjv.conf".to_string(),
                long_path(),
                "modules/current".to_string(),
            ]
        );
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size_bytes, 26);
        assert_eq!(entries[2].size_bytes, 3);
    }

    #[test]
    fn long_link_targets_are_not_entries() {
        let entries = list_tar(&sample_tar()[..], "tar").unwrap();
        let link = entries[3].metadata.as_ref().unwrap();
        assert_eq!(link["type"], "symlink");
        assert_eq!(link["link"], long_path());
        assert!(entries
            .iter()
            .all(|e| e.metadata.as_ref().unwrap()["type"] != "other"));
    }

    #[test]
    fn pax_path_overrides_name() {
        let mut builder = tar::Builder::new(Vec::new());
        builder
            .append_pax_extensions([("path", &b"psalms/ps-119.txt"[..])])
            .unwrap();
        builder
            .append_data(&mut header(EntryType::Regular, 5), "short", &b"psalm"[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap();
        let entries = list_tar(&bytes[..], "tar").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "psalms/ps-119.txt");
        assert_eq!(entries[0].size_bytes, 5);
    }

    #[test]
    fn truncated_tar_is_parse_error() {
        let bytes = sample_tar();
        let err = list_tar(&bytes[..BLOCK + 10], "tar").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn corrupt_checksum_is_rejected() {
        let mut bytes = sample_tar();
        bytes[0] = b'X';
        let err = list_tar(&bytes[..], "tar").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn detects_by_content_before_extension() {
        let tmp = TempDir::new().unwrap();
        let tar = ArchivePlugin::new(ArchiveKind::Tar);
        let targz = ArchivePlugin::new(ArchiveKind::TarGz);

        let plain = tmp.path().join("module.bin");
        std::fs::write(&plain, sample_tar()).unwrap();
        assert_eq!(tar.detect(&plain).reason.as_deref(), Some("found ustar header"));
        assert!(!targz.detect(&plain).detected);

        let gz = tmp.path().join("module.data");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&sample_tar()).unwrap();
        std::fs::write(&gz, enc.finish().unwrap()).unwrap();
        assert_eq!(
            targz.detect(&gz).reason.as_deref(),
            Some("found gzip-compressed ustar header")
        );
        assert!(!tar.detect(&gz).detected);

        let named = tmp.path().join("empty.tgz");
        std::fs::write(&named, b"").unwrap();
        assert_eq!(
            targz.detect(&named).reason.as_deref(),
            Some("matched .tar.gz/.tgz extension")
        );

        let tarxz = ArchivePlugin::new(ArchiveKind::TarXz);
        let compressed = tmp.path().join("module.pkg");
        std::fs::write(&compressed, xz(&sample_tar())).unwrap();
        assert_eq!(
            tarxz.detect(&compressed).reason.as_deref(),
            Some("found xz-compressed ustar header")
        );
        assert!(!tar.detect(&compressed).detected);
        assert!(!targz.detect(&compressed).detected);
        assert!(!tarxz.detect(&gz).detected);

        let named = tmp.path().join("empty.txz");
        std::fs::write(&named, b"").unwrap();
        assert_eq!(
            tarxz.detect(&named).reason.as_deref(),
            Some("matched .tar.xz/.txz extension")
        );
    }

    #[test]
    fn enumerates_tar_gz_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("KJV.tar.gz");
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        enc.write_all(&sample_tar()).unwrap();
        std::fs::write(&path, enc.finish().unwrap()).unwrap();

        let plugin = ArchivePlugin::new(ArchiveKind::TarGz);
        assert_eq!(plugin.artifact_id(&path, b""), "KJV");
        let listing = plugin.enumerate(&path).unwrap();
        assert_eq!(listing.entries.len(), 4);
        assert_eq!(listing.entries[1].path, "mods.d/kjv.conf");
    }

    #[test]
    fn enumerates_tar_xz_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("KJV.tar.xz");
        std::fs::write(&path, xz(&sample_tar())).unwrap();

        let plugin = ArchivePlugin::new(ArchiveKind::TarXz);
        assert_eq!(plugin.artifact_id(&path, b""), "KJV");
        let listing = plugin.enumerate(&path).unwrap();
        let paths: Vec<&str> = listing.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths[..2], ["mods.d", "mods.d/kjv.conf"]);
        assert_eq!(listing.entries[2].path, long_path());
        assert_eq!(listing.entries[1].size_bytes, 26);
    }

    #[test]
    fn corrupt_xz_stream_is_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.tar.xz");
        let mut bytes = xz(&sample_tar());
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, bytes).unwrap();
        let err = ArchivePlugin::new(ArchiveKind::TarXz).enumerate(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[test]
    fn enumerates_zip_without_extracting() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bundle.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default();
        writer.add_directory("books/", options).unwrap();
        writer.start_file("books/GEN.usfm", options).unwrap();
        let genesis = b"\\id GEN\n\\c 1\n\\v 1 In the beginning\n";
        writer.write_all(genesis).unwrap();
        writer.finish().unwrap();

        let plugin = ArchivePlugin::new(ArchiveKind::Zip);
        assert_eq!(plugin.detect(&path).reason.as_deref(), Some("found zip signature"));
        assert_eq!(plugin.artifact_id(&path, b""), "bundle");

        let listing = plugin.enumerate(&path).unwrap();
        assert_eq!(listing.entries.len(), 2);
        assert!(listing.entries[0].is_dir);
        assert_eq!(listing.entries[0].path, "books");
        assert_eq!(listing.entries[1].size_bytes, genesis.len() as u64);
        assert!(listing.entries[1].metadata.as_ref().unwrap().contains_key("method"));
    }

    #[test]
    fn ir_operations_are_unsupported() {
        let tmp = TempDir::new().unwrap();
        let plugin = ArchivePlugin::new(ArchiveKind::Zip);
        let err = plugin.extract_ir(&tmp.path().join("a.zip"), tmp.path()).unwrap_err();
        assert_eq!(err.to_string(), "format zip does not support extract-ir");
    }
}
