//! Drives the `pbench-index` binary.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_pbench-index"));
    cmd.env("RUST_LOG", "error");
    cmd
}

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("pbench-index.toml");
    fs::write(&path, body).unwrap();
    path
}

fn write_run(dir: &Path) -> std::path::PathBuf {
    let run = dir.join("cli_run");
    fs::create_dir_all(run.join("1-a/sample1")).unwrap();
    fs::write(
        run.join("metadata.log"),
        "[pbench]\nname = cli\nrpm-version = 1\n\n[run]\nstart_run = 2024-03-01T00:00:00\nend_run = 2024-03-01T00:10:00\ndate = 2024-03-01T00:00:00\n",
    )
    .unwrap();
    fs::write(run.join("1-a/sample1/result.json"), r#"{"ok": true}"#).unwrap();
    run
}

#[test]
fn index_into_bulk_file() {
    let tmp = TempDir::new().unwrap();
    let run = write_run(tmp.path());
    let bulk = tmp.path().join("bulk.ndjson");
    let config = write_config(
        tmp.path(),
        &format!("[sink]\nkind = \"jsonl\"\npath = \"{}\"\n", bulk.display()),
    );

    let output = bin()
        .arg("--config")
        .arg(&config)
        .args(["index", "--run-id", "cli1", "--progress", "off"])
        .arg(&run)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run id:      cli1"));

    // run doc + 3 toc entries + 1 result document, two lines each
    assert_eq!(fs::read_to_string(&bulk).unwrap().lines().count(), 10);
}

#[test]
fn dry_run_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let run = write_run(tmp.path());
    let bulk = tmp.path().join("bulk.ndjson");
    let config = write_config(
        tmp.path(),
        &format!("[sink]\nkind = \"jsonl\"\npath = \"{}\"\n", bulk.display()),
    );

    let output = bin()
        .arg("--config")
        .arg(&config)
        .args(["index", "--run-id", "cli1", "--dry-run", "--progress", "off"])
        .arg(&run)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("(dry-run)"));
    assert!(!bulk.exists());
}

#[test]
fn fatal_errors_map_to_exit_codes() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), "[sink]\nkind = \"memory\"\n");

    let missing = bin()
        .arg("--config")
        .arg(&config)
        .args(["index", "--run-id", "x"])
        .arg(tmp.path().join("no_such_run"))
        .output()
        .unwrap();
    assert_eq!(missing.status.code(), Some(4));

    let bad_config = write_config(tmp.path(), "[ingest]\nbatch_size = 0\n");
    let run = write_run(tmp.path());
    let output = bin()
        .arg("--config")
        .arg(&bad_config)
        .args(["index", "--run-id", "x"])
        .arg(&run)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn handlers_lists_the_table() {
    let output = bin().arg("handlers").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("iostat"));
    assert!(stdout.contains("periodic_timestamp_key_value"));
    assert!(stdout.contains("(not indexed)"));
}
