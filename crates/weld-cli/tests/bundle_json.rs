//! Integration tests for `weld bundle --json` and `weld resolve --json`.
//!
//! These tests verify:
//! - JSON output is always valid JSON with an `ok` boolean
//! - Error messages and codes are stable
//! - Resolution results carry a `status` tag

use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-p", "weld-cli", "--bin", "weld", "--"]);
    cmd
}

fn write(dir: &std::path::Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[test]
fn test_bundle_json_reports_chunks() {
    let dir = tempdir().unwrap();
    write(dir.path(), "index.js", "import { add } from './math.js';\nconsole.log(add(1, 2));\n");
    write(dir.path(), "math.js", "export function add(a, b) { return a + b; }\n");

    let output = cargo_bin()
        .args(["bundle", "./index.js", "--outdir", "out", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");

    assert_eq!(json["ok"], true, "build should succeed: {stdout}");
    let chunks = json["chunks"].as_array().expect("chunks should be an array");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0]["kind"], "entry");
    assert!(chunks[0]["output"].as_str().unwrap().ends_with("out/index.js"));

    let modules: Vec<&str> = chunks[0]["modules"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m.as_str())
        .collect();
    assert_eq!(modules, ["math.js", "index.js"]);
    assert!(json["warnings"].is_array());
}

#[test]
fn test_bundle_json_missing_entry() {
    let dir = tempdir().unwrap();

    let output = cargo_bin()
        .args(["bundle", "./nope.js", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");

    assert_eq!(json["ok"], false);
    let error = &json["errors"][0];
    assert_eq!(error["code"], "ENTRY_NOT_FOUND");
    assert_eq!(
        error["message"],
        "ModuleNotFound resolving \"./nope.js\" (entry point)"
    );
}

#[test]
fn test_bundle_writes_metafile() {
    let dir = tempdir().unwrap();
    write(dir.path(), "index.js", "export const x = 1;\n");

    let output = cargo_bin()
        .args(["bundle", "./index.js", "--metafile", "meta.json", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run bundle command");
    assert!(output.status.success());

    let meta = std::fs::read_to_string(dir.path().join("meta.json")).unwrap();
    let meta: serde_json::Value = serde_json::from_str(&meta).unwrap();
    assert!(meta["inputs"]["index.js"].is_object());
    assert!(meta["outputs"].is_object());
}

#[test]
fn test_resolve_json_package_exports() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "node_modules/pkg/package.json",
        r#"{"name": "pkg", "exports": {".": {"import": "./esm.js", "require": "./cjs.js"}}}"#,
    );
    write(dir.path(), "node_modules/pkg/esm.js", "export default 1;\n");
    write(dir.path(), "node_modules/pkg/cjs.js", "module.exports = 1;\n");

    let output = cargo_bin()
        .args(["resolve", "pkg", "--kind", "require", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run resolve command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(json["status"], "file");
    assert!(json["path"].as_str().unwrap().ends_with("cjs.js"));
}

#[test]
fn test_resolve_json_missing_package() {
    let dir = tempdir().unwrap();

    let output = cargo_bin()
        .args(["resolve", "left-pad", "--json", "--cwd"])
        .arg(dir.path())
        .output()
        .expect("Failed to run resolve command");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(json["status"], "error");
    assert_eq!(json["code"], "RESOLVE_FAILED");
    assert_eq!(
        json["message"],
        "Could not resolve: \"left-pad\". Maybe you need to \"bun install\"?"
    );
}
