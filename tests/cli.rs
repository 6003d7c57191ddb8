//! CLI test cases.
//!
//! Tests which actually render and OCR PDFs need Poppler's `pdfinfo` and
//! `pdftocairo`, plus `tesseract` with Portuguese language data, so they are
//! ignored by default. Everything else runs without any external tools.

use std::{fs, path::Path, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Our test PDFs.
static FIXTURES_DIR: &str = "tests/fixtures/pdfs";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("pdf-ocr-batch").unwrap()
}

/// Copy some fixtures into a fresh input directory.
fn input_dir_with(fixtures: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::TempDir::new().unwrap();
    for name in fixtures {
        fs::copy(Path::new(FIXTURES_DIR).join(name), dir.path().join(name)).unwrap();
    }
    dir
}

/// Parse JSON lines from standard output.
fn json_lines(stdout: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8(stdout.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_list_matches_pdf_extension_case_insensitively() {
    let input = input_dir_with(&["test_page.pdf", "Two_Pages.PDF", "notes.txt"]);
    cmd()
        .arg("list")
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("test_page.pdf"))
        .stdout(predicate::str::contains("Two_Pages.PDF"))
        .stdout(predicate::str::contains("notes.txt").not())
        .stderr(predicate::str::contains("2 PDF files found"));
}

#[test]
fn test_list_empty_directory() {
    let input = input_dir_with(&["notes.txt"]);
    cmd()
        .arg("list")
        .arg(input.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("No PDF files found"));
}

#[test]
fn test_ocr_empty_directory_finishes_immediately() {
    let input = input_dir_with(&["notes.txt"]);
    let output = cmd()
        .arg("ocr")
        .arg(input.path())
        .arg("--json-events")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(
        json_lines(&output.stdout),
        [serde_json::json!({
            "event": "finished",
            "files_completed": 0,
            "files_total": 0,
            "files_failed": 0,
        })]
    );
    assert!(input.path().join("output").is_dir());
}

#[test]
fn test_ocr_missing_input_directory_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    cmd()
        .arg("ocr")
        .arg(dir.path().join("missing"))
        .arg("--out")
        .arg(dir.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot list input directory"));
}

#[test]
fn test_ocr_skips_files_that_are_not_pdfs() {
    // `corrupt.pdf` is rejected before any external tool is run.
    let input = input_dir_with(&["corrupt.pdf"]);
    let out = input.path().join("text");
    let output = cmd()
        .arg("ocr")
        .arg(input.path())
        .arg("--out")
        .arg(&out)
        .arg("--json-events")
        .output()
        .unwrap();
    assert!(output.status.success());

    let events = json_lines(&output.stdout);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "progress");
    assert_eq!(events[0]["percent_complete"], 100);
    assert_eq!(events[0]["files_failed"], 1);
    assert!(
        events[0]["failure"]["error"]
            .as_str()
            .unwrap()
            .contains("cannot open")
    );
    assert_eq!(events[1]["event"], "finished");
    assert!(!out.join("corrupt.txt").exists());
}

#[test]
fn test_ocr_enforces_allowed_failure_rate() {
    let input = input_dir_with(&["corrupt.pdf"]);
    cmd()
        .arg("ocr")
        .arg(input.path())
        .args(["--allowed-failure-rate", "0.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("of files failed"));
}

#[test]
fn test_schema_batch_event() {
    cmd()
        .arg("schema")
        .arg("BatchEvent")
        .assert()
        .success()
        .stdout(predicate::str::contains("percent_complete"))
        .stdout(predicate::str::contains("canceled"));
}

#[test]
#[ignore = "Requires poppler-utils and tesseract with Portuguese data"]
fn test_ocr_round_trip() {
    let input = input_dir_with(&["test_page.pdf", "Two_Pages.PDF", "corrupt.pdf"]);
    let output = cmd()
        .arg("ocr")
        .arg(input.path())
        .arg("--json-events")
        .output()
        .unwrap();
    assert!(output.status.success());

    let events = json_lines(&output.stdout);
    assert_eq!(events.len(), 4);
    assert_eq!(events[3]["event"], "finished");
    assert_eq!(events[3]["files_failed"], 1);

    let out = input.path().join("output");
    let text = fs::read_to_string(out.join("test_page.txt")).unwrap();
    assert!(text.contains("TEST"), "unexpected OCR output: {:?}", text);
    assert_eq!(text.matches("--- Página 1 ---").count(), 1);
    assert!(!text.contains("--- Página 2 ---"));

    let text = fs::read_to_string(out.join("Two_Pages.txt")).unwrap();
    assert!(text.contains("--- Página 2 ---"));
    assert!(!out.join("corrupt.txt").exists());
}
