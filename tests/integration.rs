use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

const GENESIS: &str = "\\id GEN World English Bible\n\
\\h Genesis\n\
\\mt1 Genesis\n\
\\c 1\n\
\\p\n\
\\v 1 In the beginning, God \\w created|strong=\"H1254\"\\w* the heavens and the earth.\n\
\\v 2 The earth was formless and empty.\\f + \\fr 1:2 \\ft Or, a waste\\f*\n";

const JOHN_USX: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<usx version="3.0">
  <book code="JHN" style="id">World English Bible</book>
  <para style="h">John</para>
  <chapter number="1" style="c" sid="JHN 1"/>
  <para style="p">
    <verse number="1" style="v" sid="JHN 1:1"/>In the beginning was the Word.<verse eid="JHN 1:1"/>
  </para>
  <chapter eid="JHN 1"/>
</usx>
"#;

fn cdx_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_cdx"))
}

fn setup_test_env(external_enabled: bool) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("GEN.usfm"), GENESIS).unwrap();
    fs::write(files_dir.join("JHN.usx"), JOHN_USX).unwrap();
    fs::write(files_dir.join("genesis.usfm"), "\\c 1\n\\v 1 In the beginning\n").unwrap();

    // The cdx binary doubles as an external plugin through `plugin serve`.
    let plugins_dir = root.join("plugins");
    for (id, builtin) in [("ext-usfm", "usfm"), ("ext-zip", "zip")] {
        let dir = plugins_dir.join(id);
        fs::create_dir_all(&dir).unwrap();
        let manifest = serde_json::json!({
            "plugin_id": id,
            "version": "1.0.0",
            "kind": "format",
            "entrypoint": cdx_binary(),
            "args": ["plugin", "serve", builtin],
            "capabilities": { "inputs": [builtin], "outputs": ["ir"] }
        });
        fs::write(dir.join("plugin.json"), manifest.to_string()).unwrap();
    }

    let config_content = format!(
        r#"[dispatch]
external_enabled = {}
timeout_secs = 30
max_concurrency = 2

[store]
root = "{}/data/blobs"

[plugins]
manifest_dirs = ["{}/plugins"]
"#,
        external_enabled,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("cdx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_cdx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cdx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cdx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn run_json(config_path: &Path, args: &[&str]) -> Value {
    let (stdout, stderr, success) = run_cdx(config_path, args);
    assert!(success, "cdx {:?} failed: stdout={}, stderr={}", args, stdout, stderr);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad JSON ({}): {}", e, stdout))
}

fn path_str(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn test_detect_picks_plugin_by_content() {
    let (tmp, config_path) = setup_test_env(false);
    let usx = tmp.path().join("files/JHN.usx");

    let out = run_json(&config_path, &["detect", path_str(&usx)]);
    assert_eq!(out["plugin"], "usx");
    assert_eq!(out["result"]["detected"], true);
    assert_eq!(out["result"]["reason"], "found <usx> root element");
}

#[test]
fn test_detect_never_fails_on_bad_input() {
    let (tmp, config_path) = setup_test_env(false);
    let missing = tmp.path().join("files/missing.usfm");

    let out = run_json(&config_path, &["detect", "--plugin", "usfm", path_str(&missing)]);
    assert_eq!(out["detected"], false);
    assert!(out["reason"].as_str().unwrap().starts_with("cannot stat input"));

    let out = run_json(&config_path, &["detect", "--plugin", "usfm", path_str(tmp.path())]);
    assert_eq!(out["detected"], false);
    assert_eq!(out["reason"], "not a regular file");
}

#[test]
fn test_ingest_stores_blob_under_book_code() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/GEN.usfm");

    let out = run_json(&config_path, &["ingest", "usfm", path_str(&input)]);
    assert_eq!(out["artifact_id"], "GEN");
    assert_eq!(out["size_bytes"], GENESIS.len() as u64);

    let digest = out["blob_sha256"].as_str().unwrap();
    assert_eq!(digest.len(), 64);
    let blob = tmp
        .path()
        .join("data/blobs")
        .join(&digest[..2])
        .join(digest);
    assert_eq!(fs::read_to_string(blob).unwrap(), GENESIS);

    // Idempotent: same digest, same single blob.
    let again = run_json(&config_path, &["ingest", "usfm", path_str(&input)]);
    assert_eq!(again["blob_sha256"], out["blob_sha256"]);
}

#[test]
fn test_ingest_falls_back_to_file_name() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/genesis.usfm");

    let out = run_json(&config_path, &["ingest", "usfm", path_str(&input)]);
    assert_eq!(out["artifact_id"], "genesis.usfm");
}

#[test]
fn test_usfm_round_trip_is_l0() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/GEN.usfm");
    let out_dir = tmp.path().join("out");

    let extracted = run_json(
        &config_path,
        &["extract-ir", "usfm", path_str(&input), "-o", path_str(&out_dir)],
    );
    assert_eq!(extracted["loss_class"], "L0");
    let ir_path = extracted["ir_path"].as_str().unwrap();
    assert!(ir_path.ends_with("GEN.ir.json"));

    let emitted = run_json(
        &config_path,
        &["emit-native", "usfm", ir_path, "-o", path_str(&out_dir)],
    );
    assert_eq!(emitted["loss_class"], "L0");
    assert_eq!(emitted["format"], "usfm");
    let output = emitted["output_path"].as_str().unwrap();
    assert_eq!(fs::read(output).unwrap(), GENESIS.as_bytes());
}

#[test]
fn test_usx_round_trip_is_l0() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/JHN.usx");
    let out_dir = tmp.path().join("out");

    let extracted = run_json(
        &config_path,
        &["extract-ir", "usx", path_str(&input), "-o", path_str(&out_dir)],
    );
    let ir_path = extracted["ir_path"].as_str().unwrap();
    let emitted = run_json(
        &config_path,
        &["emit-native", "usx", ir_path, "-o", path_str(&out_dir)],
    );
    assert_eq!(emitted["loss_class"], "L0");
    assert_eq!(
        fs::read_to_string(emitted["output_path"].as_str().unwrap()).unwrap(),
        JOHN_USX
    );
}

#[test]
fn test_convert_reports_loss() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/JHN.usx");
    let out_dir = tmp.path().join("out");

    let out = run_json(
        &config_path,
        &["convert", path_str(&input), "--to", "usfm", "-o", path_str(&out_dir)],
    );
    assert_eq!(out["source_plugin"], "usx");
    assert_ne!(out["loss_class"], "L0");
    let warnings = out["emit"]["loss_report"]["warnings"].as_array().unwrap();
    assert!(warnings
        .iter()
        .any(|w| w == "regenerated usfm from structured IR"));
    let usfm = fs::read_to_string(out_dir.join("JHN.usfm")).unwrap();
    assert!(usfm.starts_with("\\id JHN"));
    assert!(usfm.contains("\\v 1 In the beginning was the Word."));
}

#[test]
fn test_unsupported_operation_fails_closed() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/GEN.usfm");

    let (stdout, stderr, success) = run_cdx(
        &config_path,
        &["extract-ir", "zip", path_str(&input), "-o", path_str(tmp.path())],
    );
    assert!(!success);
    assert!(stdout.is_empty());
    assert!(stderr.contains("format zip does not support extract-ir"), "stderr={}", stderr);
}

#[test]
fn test_unknown_plugin_is_an_error() {
    let (tmp, config_path) = setup_test_env(false);
    let (_, stderr, success) = run_cdx(
        &config_path,
        &["enumerate", "osis", path_str(tmp.path())],
    );
    assert!(!success);
    assert!(stderr.contains("no plugin registered with id 'osis'"));
}

#[test]
fn test_enumerate_directory() {
    let (tmp, config_path) = setup_test_env(false);
    let files = tmp.path().join("files");

    let out = run_json(&config_path, &["enumerate", "dir", path_str(&files)]);
    let paths: Vec<&str> = out["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["GEN.usfm", "JHN.usx", "genesis.usfm"]);
}

fn sword_module_tar() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let conf = b"[KJV]\nDataPath=./modules/texts/ztext/kjv/\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(conf.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, "mods.d/kjv.conf", &conf[..]).unwrap();
    let mut header = tar::Header::new_gnu();
    header.set_size(GENESIS.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "modules/texts/ztext/kjv/GEN.usfm", GENESIS.as_bytes())
        .unwrap();
    builder.into_inner().unwrap()
}

#[test]
fn test_detect_and_enumerate_tar_xz() {
    let (tmp, config_path) = setup_test_env(false);
    let archives = tmp.path().join("archives");
    fs::create_dir_all(&archives).unwrap();

    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(&sword_module_tar()).unwrap();
    let compressed = encoder.finish().unwrap();
    let module = archives.join("KJV.tar.xz");
    fs::write(&module, &compressed).unwrap();
    // Content decides, not the name.
    let renamed = archives.join("kjv-module.bin");
    fs::write(&renamed, &compressed).unwrap();

    let out = run_json(&config_path, &["detect", path_str(&renamed)]);
    assert_eq!(out["plugin"], "tar.xz");
    assert_eq!(out["result"]["reason"], "found xz-compressed ustar header");

    let out = run_json(&config_path, &["enumerate", "tar.xz", path_str(&module)]);
    let entries = out["entries"].as_array().unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e["path"].as_str().unwrap()).collect();
    assert_eq!(paths, vec!["mods.d/kjv.conf", "modules/texts/ztext/kjv/GEN.usfm"]);
    assert_eq!(entries[1]["size_bytes"], GENESIS.len() as u64);
    assert_eq!(entries[1]["is_dir"], false);

    let store = tmp.path().join("blobs");
    let out = run_json(
        &config_path,
        &["ingest", "tar.xz", path_str(&module), "-o", path_str(&store)],
    );
    assert_eq!(out["artifact_id"], "KJV");
    assert_eq!(out["size_bytes"], compressed.len() as u64);
}

#[test]
fn test_plugins_lists_builtins_and_external() {
    let (_tmp, config_path) = setup_test_env(false);

    let out = run_json(&config_path, &["plugins", "--json"]);
    let plugins = out.as_array().unwrap();
    let find = |id: &str| plugins.iter().find(|p| p["plugin_id"] == id).cloned();

    let usfm = find("usfm").unwrap();
    assert_eq!(usfm["transport"], "embedded");
    assert_eq!(usfm["available"], true);

    let external = find("ext-usfm").unwrap();
    assert_eq!(external["transport"], "external");
    assert_eq!(external["available"], false);

    let (stdout, _, success) = run_cdx(&config_path, &["plugins"]);
    assert!(success);
    assert!(stdout.starts_with("PLUGIN"));
}

#[test]
fn test_tool_stub_requires_external_plugin() {
    let (_tmp, config_path) = setup_test_env(false);

    let (_, stderr, success) = run_cdx(&config_path, &["tool", "calibre", "convert"]);
    assert!(!success);
    assert!(stderr.contains("calibre command 'convert' requires external plugin"));
}

#[test]
fn test_tool_lists_sources() {
    let (_tmp, config_path) = setup_test_env(false);

    let out = run_json(&config_path, &["tool", "sword-repo", "list-sources"]);
    let names: Vec<&str> = out["sources"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"CrossWire"));
    assert!(names.contains(&"eBible.org"));
}

#[test]
fn test_batch_ingests_tree() {
    let (tmp, config_path) = setup_test_env(false);
    let files = tmp.path().join("files");

    let out = run_json(&config_path, &["batch", path_str(&files), "--progress", "off"]);
    assert_eq!(out["scanned"], 3);
    assert_eq!(out["ingested"], 3);
    assert_eq!(out["failed"], 0);
    let items = out["items"].as_array().unwrap();
    assert_eq!(items[0]["artifact_id"], "GEN");
    assert_eq!(items[1]["plugin"], "usx");
}

#[test]
fn test_plugin_serve_speaks_the_protocol() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("GEN.usfm");
    fs::write(&input, GENESIS).unwrap();

    let mut child = Command::new(cdx_binary())
        .args(["plugin", "serve", "usfm"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let request = serde_json::json!({"command": "detect", "args": {"path": input}});
    child
        .stdin
        .take()
        .unwrap()
        .write_all(request.to_string().as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let response: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["status"], "ok");
    assert_eq!(response["result"]["detected"], true);
    assert_eq!(response["result"]["format"], "usfm");
}

#[test]
fn test_plugin_serve_exits_nonzero_on_error() {
    let mut child = Command::new(cdx_binary())
        .args(["plugin", "serve", "usfm"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(br#"{"command": "repair", "args": {}}"#)
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(!output.status.success());

    let response: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["status"], "error");
    assert_eq!(response["code"], "unknown_command");
}

#[test]
fn test_external_transport_matches_embedded() {
    let (tmp, config_path) = setup_test_env(true);
    let input = tmp.path().join("files/GEN.usfm");

    let embedded = run_json(&config_path, &["detect", "--plugin", "usfm", path_str(&input)]);
    let external = run_json(&config_path, &["detect", "--plugin", "ext-usfm", path_str(&input)]);
    assert_eq!(embedded, external);

    let embedded = run_json(&config_path, &["ingest", "usfm", path_str(&input)]);
    let external = run_json(&config_path, &["ingest", "ext-usfm", path_str(&input)]);
    assert_eq!(embedded, external);

    let a = tmp.path().join("embedded");
    let b = tmp.path().join("external");
    let embedded = run_json(&config_path, &["extract-ir", "usfm", path_str(&input), "-o", path_str(&a)]);
    let external = run_json(
        &config_path,
        &["extract-ir", "ext-usfm", path_str(&input), "-o", path_str(&b)],
    );
    assert_eq!(embedded["loss_class"], external["loss_class"]);
    assert_eq!(
        fs::read(a.join("GEN.ir.json")).unwrap(),
        fs::read(b.join("GEN.ir.json")).unwrap()
    );
}

#[test]
fn test_external_errors_match_embedded() {
    let (tmp, config_path) = setup_test_env(true);
    let input = tmp.path().join("files/GEN.usfm");
    let out = path_str(tmp.path());

    let (_, embedded, ok_a) = run_cdx(&config_path, &["extract-ir", "zip", path_str(&input), "-o", out]);
    let (_, external, ok_b) = run_cdx(&config_path, &["extract-ir", "ext-zip", path_str(&input), "-o", out]);
    assert!(!ok_a && !ok_b);
    assert!(embedded.contains("format zip does not support extract-ir"));
    assert!(external.contains("format zip does not support extract-ir"));
}

#[test]
fn test_external_dispatch_disabled_by_default() {
    let (tmp, config_path) = setup_test_env(false);
    let input = tmp.path().join("files/GEN.usfm");

    let (_, stderr, success) = run_cdx(&config_path, &["detect", "--plugin", "ext-usfm", path_str(&input)]);
    assert!(!success);
    assert!(stderr.contains("external dispatch is disabled"));
}
