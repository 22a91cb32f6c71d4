//! Document formats accepted by `plex upload`: PDF, plain text and CSV.
//! Anything else is attached as a degraded document with a diagnostic.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use personaplex::extract::{FileExtractor, UNSUPPORTED_FORMAT};
use personaplex_core::reader::{DocumentReader, ReadOutcome};

fn plex_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("plex");
    path
}

/// Minimal valid PDF containing the text "quarterly revenue grew".
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf_with_phrase() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 54 >> stream\nBT /F1 12 Tf 100 700 Td (quarterly revenue grew) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_file_support_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::create_dir_all(root.join("docs")).unwrap();
    fs::write(root.join("docs/report.pdf"), minimal_pdf_with_phrase()).unwrap();
    fs::write(root.join("docs/broken.pdf"), b"%PDF-1.4 not really").unwrap();
    fs::write(
        root.join("docs/staff.csv"),
        "name,role\nAda,engineer\nGrace,admiral\n",
    )
    .unwrap();
    fs::write(root.join("docs/notes.txt"), "plain notes").unwrap();

    let config_path = root.join("plex.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/plex.sqlite\"\n\n[generation]\nprovider = \"disabled\"\n",
            root.display()
        ),
    )
    .unwrap();
    (tmp, config_path)
}

fn read(path: &Path) -> ReadOutcome {
    let extension = personaplex_core::reader::extension_of(path);
    FileExtractor.read(path, &extension)
}

fn upload(config: &Path, file: &Path) -> serde_json::Value {
    let output = Command::new(plex_binary())
        .arg("--config")
        .arg(config)
        .args(["upload", "--owner", "alice", "--json"])
        .arg(file)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "upload failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_pdf_text_is_extracted() {
    let (tmp, _) = setup_file_support_env();
    match read(&tmp.path().join("docs/report.pdf")) {
        ReadOutcome::Text(text) => assert!(text.contains("quarterly revenue grew")),
        ReadOutcome::Degraded(d) => panic!("pdf degraded: {}", d),
    }
}

#[test]
fn test_corrupt_pdf_degrades() {
    let (tmp, _) = setup_file_support_env();
    let outcome = read(&tmp.path().join("docs/broken.pdf"));
    assert!(outcome.is_degraded());
    assert!(outcome.into_content().starts_with("File reading error:"));
}

#[test]
fn test_csv_rows_keep_their_order() {
    let (tmp, _) = setup_file_support_env();
    let text = read(&tmp.path().join("docs/staff.csv")).into_content();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("name"));
    assert!(lines[1].starts_with("Ada"));
    assert!(lines[2].starts_with("Grace"));
}

#[test]
fn test_uppercase_extension_is_accepted() {
    let (tmp, _) = setup_file_support_env();
    let shouty = tmp.path().join("docs/NOTES.TXT");
    fs::write(&shouty, "upper case name").unwrap();
    assert_eq!(read(&shouty).into_content(), "upper case name");
}

#[test]
fn test_unknown_extension_reports_unsupported() {
    let (tmp, _) = setup_file_support_env();
    let docx = tmp.path().join("docs/memo.docx");
    fs::write(&docx, b"PK\x03\x04").unwrap();
    let outcome = read(&docx);
    assert!(outcome.is_degraded());
    assert_eq!(outcome.into_content(), UNSUPPORTED_FORMAT);
}

#[test]
fn test_cli_uploads_each_supported_format() {
    let (tmp, config) = setup_file_support_env();
    for name in ["report.pdf", "staff.csv", "notes.txt"] {
        let report = upload(&config, &tmp.path().join("docs").join(name));
        assert_eq!(report["file_name"], name);
        assert_eq!(report["chunks"], 1, "{} should yield one chunk", name);
        assert!(report["degraded"].is_null());
    }
}

#[test]
fn test_cli_upload_of_corrupt_pdf_still_attaches() {
    let (tmp, config) = setup_file_support_env();
    let report = upload(&config, &tmp.path().join("docs/broken.pdf"));
    assert_eq!(report["chunks"], 0);
    assert!(report["degraded"]
        .as_str()
        .unwrap()
        .starts_with("File reading error:"));
}
