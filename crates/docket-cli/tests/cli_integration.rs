use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_docket<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_docket"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute docket binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_docket(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "docket command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn write_fixture(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes)
        .unwrap_or_else(|err| panic!("failed to write fixture {}: {err}", path.display()));
    path
}

// Test IDs: TCLI-001
#[test]
fn create_upload_and_build_index_flow() {
    let root = unique_temp_dir("docket-cli-flow");
    let fixtures = unique_temp_dir("docket-cli-fixtures");
    let root_arg = format!("--root={}", path_str(&root));

    let created = run_json([root_arg.as_str(), "create-case"]);
    assert_eq!(as_str(&created, "contract_version"), "cli.v1");
    let case_id = as_str(&created, "case_id").to_string();

    let report = write_fixture(&fixtures, "report_2020-02-08.pdf", b"report");
    let notes = write_fixture(&fixtures, "02-08-2020_notes.txt", b"notes");
    let scan = write_fixture(&fixtures, "scan.pdf", b"scan");
    for (path, content_type) in [
        (&report, "application/pdf"),
        (&notes, "text/plain"),
        (&scan, "application/pdf"),
    ] {
        let uploaded = run_json([
            root_arg.as_str(),
            "upload",
            case_id.as_str(),
            path_str(path),
            "--content-type",
            content_type,
        ]);
        assert_eq!(as_str(&uploaded, "case_id"), case_id);
        assert_eq!(as_str(&uploaded, "content_type"), content_type);
    }

    let listing = run_json([root_arg.as_str(), "list-files", case_id.as_str()]);
    assert_eq!(as_u64(&listing, "count"), 3);

    let built = run_json([root_arg.as_str(), "build-index", case_id.as_str()]);
    assert_eq!(as_u64(&built, "record_count"), 3);
    let index_key = as_str(&built, "index_key");
    assert_eq!(index_key, format!("cases/{case_id}/outputs/index.csv"));
    assert!(as_str(&built, "download_url").contains("token="));

    let manifest_path = root.join("cases").join(&case_id).join("outputs").join("index.csv");
    let csv = fs::read_to_string(&manifest_path)
        .unwrap_or_else(|err| panic!("failed to read manifest {}: {err}", manifest_path.display()));
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "best_date_utc,date_source,filename,size_bytes,key");
    assert!(lines[1].starts_with("2020-02-08T00:00:00Z,filename,02-08-2020_notes.txt,5,"));
    assert!(lines[2].starts_with("2020-02-08T00:00:00Z,filename,report_2020-02-08.pdf,6,"));
    assert!(lines[3].contains(",storage_timestamp,scan.pdf,4,"));

    let _ = fs::remove_dir_all(&root);
    let _ = fs::remove_dir_all(&fixtures);
}

// Test IDs: TCLI-002
#[test]
fn presign_emits_a_signed_upload_link() {
    let root = unique_temp_dir("docket-cli-presign");
    let root_arg = format!("--root={}", path_str(&root));

    let presigned =
        run_json([root_arg.as_str(), "presign", "case-1", "scan.pdf", "--content-type", "application/pdf"]);
    assert_eq!(as_str(&presigned, "contract_version"), "cli.v1");
    assert_eq!(as_str(&presigned, "key"), "cases/case-1/raw/scan.pdf");
    assert_eq!(as_str(&presigned, "content_type"), "application/pdf");
    assert_eq!(as_u64(&presigned, "expires_in_seconds"), 900);
    assert!(as_str(&presigned, "upload_url").starts_with("/v1/blobs/cases/case-1/raw/scan.pdf?"));

    let _ = fs::remove_dir_all(&root);
}

// Test IDs: TCLI-003
#[test]
fn invalid_inputs_fail_without_touching_the_store() {
    let root = unique_temp_dir("docket-cli-invalid");
    let root_arg = format!("--root={}", path_str(&root));

    let output = run_docket([root_arg.as_str(), "presign", "bad/case", "scan.pdf"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("case_id"));

    let output = run_docket([root_arg.as_str(), "presign", "case-1", "../escape.pdf"]);
    assert!(!output.status.success());

    let _ = fs::remove_dir_all(&root);
}

// Test IDs: TCLI-004
#[test]
fn extract_date_reports_pattern_matches() {
    let root = unique_temp_dir("docket-cli-extract");
    let root_arg = format!("--root={}", path_str(&root));

    let matched = run_json([root_arg.as_str(), "extract-date", "report_2026-02-08_final.pdf"]);
    assert_eq!(matched.get("matched"), Some(&Value::Bool(true)));
    assert_eq!(as_str(&matched, "date"), "2026-02-08");

    let month_first = run_json([root_arg.as_str(), "extract-date", "02-08-2026_notes.txt"]);
    assert_eq!(as_str(&month_first, "date"), "2026-02-08");

    let unmatched = run_json([root_arg.as_str(), "extract-date", "scan.pdf"]);
    assert_eq!(unmatched.get("matched"), Some(&Value::Bool(false)));
    assert!(unmatched.get("date").is_none());

    // A textual match with an impossible calendar date yields no date at all.
    let invalid = run_json([root_arg.as_str(), "extract-date", "report_2026-13-40.pdf"]);
    assert_eq!(invalid.get("matched"), Some(&Value::Bool(false)));

    let _ = fs::remove_dir_all(&root);
}
