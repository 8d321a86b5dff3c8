//! Tests for binary source formats: DOCX and PDF extraction through upload
//! and reingestion, including the failure paths that mark a document's
//! index status as `error`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn csr_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("csr");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_content = format!(
        r#"[database]
path = "{}/data/csr.db"

[storage]
root = "{}/storage"

[chunking]
max_chars = 500
min_chars = 100

[generation]
mode = "stub"
"#,
        root.display(),
        root.display()
    );

    let config_path = root.join("csr.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_csr(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = csr_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run csr binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn add_study(config_path: &Path) {
    let (stdout, stderr, success) = run_csr(
        config_path,
        &[
            "study",
            "add",
            "--code",
            "AB-101",
            "--title",
            "A Phase 2 Study of Abralizumab",
        ],
    );
    assert!(
        success,
        "study add failed: stdout={}, stderr={}",
        stdout, stderr
    );
}

fn upload(config_path: &Path, file: &Path, doc_type: &str) -> (String, String, bool) {
    run_csr(
        config_path,
        &[
            "upload",
            file.to_str().unwrap(),
            "--study",
            "AB-101",
            "--doc-type",
            doc_type,
        ],
    )
}

fn doc_id_from_sources(config_path: &Path, file_name: &str) -> String {
    let (stdout, _, success) = run_csr(config_path, &["sources", "--study", "AB-101", "--all"]);
    assert!(success, "sources failed: {}", stdout);
    let line = stdout
        .lines()
        .find(|l| l.contains(file_name) && !l.starts_with("ID"))
        .unwrap_or_else(|| panic!("no document row for {} in: {}", file_name, stdout));
    line.chars().take(36).collect::<String>().trim().to_string()
}

/// All files under `storage/<study-id>/`.
fn stored_files(storage_root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    if let Ok(entries) = fs::read_dir(storage_root) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Ok(inner) = fs::read_dir(entry.path()) {
                    for f in inner.flatten() {
                        found.push(f.path());
                    }
                }
            }
        }
    }
    found
}

/// Repeat a sentence until the paragraph reaches roughly 300 characters,
/// so three of them split into exactly three chunks at max_chars=500.
fn docx_paragraph(sentence: &str) -> String {
    let mut p = String::new();
    while p.chars().count() < 300 {
        p.push_str(sentence);
        p.push(' ');
    }
    p.trim_end().to_string()
}

/// Minimal DOCX: a ZIP holding word/document.xml with one `w:p` block per
/// paragraph.
fn minimal_docx_with_paragraphs(paragraphs: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        zip.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )
        .unwrap();
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

fn protocol_docx() -> Vec<u8> {
    minimal_docx_with_paragraphs(&[
        docx_paragraph("The study protocol defines eligibility and dosing."),
        docx_paragraph("The pharmacokinetic sampling schedule covers eight visits."),
        docx_paragraph("Adverse events were recorded throughout the trial."),
    ])
}

#[test]
fn test_docx_upload_extracts_and_chunks() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path);

    let file = tmp.path().join("report.docx");
    fs::write(&file, protocol_docx()).unwrap();

    let (stdout, stderr, success) = upload(&config_path, &file, "protocol");
    assert!(success, "upload failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Uploaded report.docx"));
    assert!(
        stdout.contains("indexed (3 chunks)"),
        "one chunk per paragraph: {}",
        stdout
    );

    let (stdout, _, success) = run_csr(
        &config_path,
        &["chunks", "--study", "AB-101", "--query", "pharmacokinetic"],
    );
    assert!(success);
    assert!(stdout.contains("total: 1"), "query hit: {}", stdout);
    assert!(stdout.contains("pharmacokinetic"));
}

#[test]
fn test_corrupt_docx_marks_index_error() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path);

    let file = tmp.path().join("bad.docx");
    fs::write(&file, b"not a zip archive").unwrap();

    // The upload itself succeeds; only the indexing step fails.
    let (stdout, stderr, success) = upload(&config_path, &file, "protocol");
    assert!(success, "upload must register the file: {} {}", stdout, stderr);
    assert!(stdout.contains("Uploaded bad.docx"));
    assert!(stderr.contains("index error"), "stderr: {}", stderr);
    assert!(stderr.contains("extraction failed"), "stderr: {}", stderr);

    let (stdout, _, _) = run_csr(&config_path, &["sources", "--study", "AB-101"]);
    assert!(stdout.contains("error"), "index status: {}", stdout);

    let (stdout, _, _) = run_csr(&config_path, &["chunks", "--study", "AB-101"]);
    assert!(stdout.contains("total: 0"));
}

#[test]
fn test_corrupt_pdf_marks_index_error() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path);

    let file = tmp.path().join("bad.pdf");
    fs::write(&file, b"not a valid pdf").unwrap();

    let (stdout, stderr, success) = upload(&config_path, &file, "protocol");
    assert!(success, "upload must register the file: {} {}", stdout, stderr);
    assert!(stderr.contains("index error"), "stderr: {}", stderr);
    assert!(stderr.contains("extraction failed"), "stderr: {}", stderr);

    let (stdout, _, _) = run_csr(&config_path, &["sources", "--study", "AB-101"]);
    assert!(stdout.contains("error"), "index status: {}", stdout);
}

#[test]
fn test_unsupported_extension_reports_error() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path);

    let file = tmp.path().join("slides.pptx");
    fs::write(&file, b"binary slide deck").unwrap();

    let (stdout, stderr, success) = upload(&config_path, &file, "protocol");
    assert!(success, "upload must register the file: {} {}", stdout, stderr);
    assert!(stderr.contains("unsupported format"), "stderr: {}", stderr);

    let (stdout, _, _) = run_csr(&config_path, &["sources", "--study", "AB-101"]);
    assert!(stdout.contains("error"), "index status: {}", stdout);
}

#[test]
fn test_reingest_corrupt_stored_docx_preserves_chunks() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path);

    let file = tmp.path().join("report.docx");
    fs::write(&file, protocol_docx()).unwrap();
    let (stdout, _, success) = upload(&config_path, &file, "protocol");
    assert!(success);
    assert!(stdout.contains("indexed (3 chunks)"));

    // Corrupt the stored copy so re-extraction fails.
    let stored = stored_files(&tmp.path().join("storage"));
    assert_eq!(stored.len(), 1, "one stored file expected: {:?}", stored);
    fs::write(&stored[0], b"garbage, no longer a zip").unwrap();

    let doc_id = doc_id_from_sources(&config_path, "report.docx");
    let (stdout, stderr, success) = run_csr(&config_path, &["reingest", "--doc", &doc_id]);
    assert!(!success, "reingest of a corrupt file must fail: {}", stdout);
    assert!(stderr.contains("extraction failed"), "stderr: {}", stderr);

    // The old chunk set survives the failed run.
    let (stdout, _, _) = run_csr(&config_path, &["chunks", "--study", "AB-101"]);
    assert!(stdout.contains("total: 3"), "chunks intact: {}", stdout);

    let (stdout, _, _) = run_csr(&config_path, &["sources", "--study", "AB-101"]);
    assert!(stdout.contains("error"), "index status: {}", stdout);
}

#[test]
fn test_reingest_picks_up_replaced_storage_content() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path);

    let file = tmp.path().join("report.docx");
    fs::write(
        &file,
        minimal_docx_with_paragraphs(&[
            docx_paragraph("Results for the alpha-cohort were analysed first."),
            docx_paragraph("Baseline demographics were balanced across arms."),
            docx_paragraph("No deaths were reported during the study period."),
        ]),
    )
    .unwrap();
    let (stdout, _, success) = upload(&config_path, &file, "report");
    assert!(success);
    assert!(stdout.contains("indexed (3 chunks)"));

    let stored = stored_files(&tmp.path().join("storage"));
    assert_eq!(stored.len(), 1);
    fs::write(
        &stored[0],
        minimal_docx_with_paragraphs(&[
            docx_paragraph("Results for the beta-cohort replace the earlier set."),
            docx_paragraph("Baseline demographics were balanced across arms."),
            docx_paragraph("No deaths were reported during the study period."),
        ]),
    )
    .unwrap();

    let doc_id = doc_id_from_sources(&config_path, "report.docx");
    let (stdout, stderr, success) = run_csr(&config_path, &["reingest", "--doc", &doc_id]);
    assert!(success, "reingest failed: {} {}", stdout, stderr);
    assert!(stdout.contains("chunks: 3"));

    let (stdout, _, _) = run_csr(
        &config_path,
        &["chunks", "--study", "AB-101", "--query", "beta-cohort"],
    );
    assert!(stdout.contains("total: 1"), "new content indexed: {}", stdout);

    let (stdout, _, _) = run_csr(
        &config_path,
        &["chunks", "--study", "AB-101", "--query", "alpha-cohort"],
    );
    assert!(stdout.contains("total: 0"), "old content gone: {}", stdout);
}
