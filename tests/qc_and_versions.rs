//! Tests for the authored side of a report: section versions, template
//! registration and rendering, and the QC rule battery.

use std::fs;
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

fn add_study(config_path: &Path, code: &str) {
    let (stdout, stderr, success) = run_csr(
        config_path,
        &[
            "study",
            "add",
            "--code",
            code,
            "--title",
            "A Phase 2 Study of Abralizumab",
            "--sponsor",
            "Abra Therapeutics",
        ],
    );
    assert!(
        success,
        "study add failed: stdout={}, stderr={}",
        stdout, stderr
    );
}

/// Repeat a sentence until the text reaches at least `min_chars`.
fn long_text(min_chars: usize) -> String {
    let sentence = "The synopsis summarizes the objectives, design, population, endpoints, and principal findings of the study. ";
    let mut text = String::new();
    while text.chars().count() < min_chars {
        text.push_str(sentence);
    }
    text
}

/// First data-row issue id from `qc issues` output.
fn first_issue_id(stdout: &str) -> String {
    let line = stdout
        .lines()
        .find(|l| !l.starts_with("ID") && !l.trim().is_empty())
        .unwrap_or_else(|| panic!("no issue rows in: {}", stdout));
    line.chars().take(36).collect::<String>().trim().to_string()
}

#[test]
fn test_edit_show_and_history() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &[
            "edit",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--text",
            "First draft of the synopsis.",
            "--by",
            "m.wagner",
        ],
    );
    assert!(success, "edit failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Saved section SYNOPSIS for study 'AB-101'"));
    assert!(stdout.contains("author:   m.wagner"));

    let (_, _, success) = run_csr(
        &config_path,
        &[
            "edit",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--text",
            "Second draft of the synopsis.",
            "--by",
            "m.wagner",
        ],
    );
    assert!(success);

    // Plain show prints the latest version.
    let (stdout, _, success) = run_csr(
        &config_path,
        &["show", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(stdout.contains("--- Section SYNOPSIS (study AB-101) ---"));
    assert!(stdout.contains("provenance:  human"));
    assert!(stdout.contains("Second draft of the synopsis."));
    assert!(!stdout.contains("First draft"));

    let (stdout, _, success) = run_csr(
        &config_path,
        &[
            "show",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--history",
        ],
    );
    assert!(success);
    assert!(stdout.contains("--- History: section SYNOPSIS (study AB-101) ---"));
    let rows = stdout
        .lines()
        .filter(|l| l.contains("human"))
        .count();
    assert_eq!(rows, 2, "both versions in history: {}", stdout);
}

#[test]
fn test_edit_requires_exactly_one_input() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (_, stderr, success) = run_csr(
        &config_path,
        &["edit", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(!success, "edit without input must fail");
    assert!(stderr.contains("exactly one"), "stderr: {}", stderr);

    let draft = tmp.path().join("draft.txt");
    fs::write(&draft, "text").unwrap();
    let (_, stderr, success) = run_csr(
        &config_path,
        &[
            "edit",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--text",
            "inline",
            "--file",
            draft.to_str().unwrap(),
        ],
    );
    assert!(!success, "edit with both inputs must fail");
    assert!(stderr.contains("exactly one"), "stderr: {}", stderr);
}

#[test]
fn test_edit_from_file() {
    let (tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let draft = tmp.path().join("draft.txt");
    fs::write(&draft, "Synopsis draft from file.\n").unwrap();

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &[
            "edit",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--file",
            draft.to_str().unwrap(),
        ],
    );
    assert!(success, "edit from file failed: {} {}", stdout, stderr);
    assert!(stdout.contains("length:   26 chars"), "length: {}", stdout);

    let (stdout, _, _) = run_csr(
        &config_path,
        &["show", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(stdout.contains("Synopsis draft from file."));
}

#[test]
fn test_show_unknown_section_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (_, stderr, success) = run_csr(
        &config_path,
        &["show", "--study", "AB-101", "--section", "NOSUCH"],
    );
    assert!(!success, "unknown section must fail");
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_show_empty_section_reports_no_versions() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (stdout, _, success) = run_csr(
        &config_path,
        &["show", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(stdout.contains("Section SYNOPSIS of study 'AB-101' has no versions yet."));
}

#[test]
fn test_render_substitutes_and_reports_missing() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &[
            "template",
            "add",
            "--name",
            "syn-skeleton",
            "--kind",
            "section",
            "--section",
            "SYNOPSIS",
            "--content",
            "Study {{study_code}}: {{study_title}}. Note: {{custom_note}}. Open: {{unknown_thing}}.",
        ],
    );
    assert!(success, "template add failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Registered template 'syn-skeleton'"));
    assert!(
        stdout.contains("variables: study_code, study_title, custom_note, unknown_thing"),
        "variables derived from content: {}",
        stdout
    );

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &[
            "render",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--var",
            "custom_note=reviewed by medical writing",
        ],
    );
    assert!(success, "render failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Rendered section SYNOPSIS for study 'AB-101'"));
    assert!(stdout.contains("template: syn-skeleton v1 (global)"));
    assert!(stdout.contains("used:     study_code, study_title, custom_note"));
    assert!(stdout.contains("missing:  unknown_thing"));

    // The rendered text lands as the latest version; unknown placeholders
    // stay verbatim.
    let (stdout, _, _) = run_csr(
        &config_path,
        &["show", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(stdout.contains("provenance:  template ("));
    assert!(stdout.contains("Study AB-101: A Phase 2 Study of Abralizumab."));
    assert!(stdout.contains("Note: reviewed by medical writing."));
    assert!(stdout.contains("{{unknown_thing}}"));
}

#[test]
fn test_render_var_override_beats_study_metadata() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &[
            "template",
            "add",
            "--name",
            "code-line",
            "--kind",
            "section",
            "--section",
            "SYNOPSIS",
            "--content",
            "Code: {{study_code}}.",
        ],
    );
    assert!(success, "template add failed: {} {}", stdout, stderr);

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &[
            "render",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--var",
            "study_code=ZZ-999",
        ],
    );
    assert!(success, "render failed: {} {}", stdout, stderr);

    let (stdout, _, success) = run_csr(
        &config_path,
        &["show", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(
        stdout.contains("Code: ZZ-999."),
        "caller --var must shadow the study field: {}",
        stdout
    );
    assert!(!stdout.contains("Code: AB-101."));
}

#[test]
fn test_render_without_template_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (_, stderr, success) = run_csr(
        &config_path,
        &["render", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(!success, "render without a template must fail");
    assert!(
        stderr.contains("no active section template"),
        "stderr: {}",
        stderr
    );
}

#[test]
fn test_template_reregistration_bumps_version() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);

    let add = |content: &str| {
        run_csr(
            &config_path,
            &[
                "template",
                "add",
                "--name",
                "syn-skeleton",
                "--kind",
                "section",
                "--section",
                "SYNOPSIS",
                "--content",
                content,
            ],
        )
    };

    let (stdout, _, success) = add("First body {{study_code}}");
    assert!(success);
    assert!(stdout.contains("version:   1"), "first version: {}", stdout);

    let (stdout, _, success) = add("Second body {{study_code}}");
    assert!(success);
    assert!(stdout.contains("version:   2"), "bumped version: {}", stdout);

    let (stdout, _, success) = run_csr(&config_path, &["template", "list"]);
    assert!(success);
    let rows = stdout
        .lines()
        .filter(|l| l.contains("syn-skeleton"))
        .count();
    assert_eq!(rows, 2, "both versions listed: {}", stdout);

    let (stdout, _, success) = run_csr(
        &config_path,
        &["template", "list", "--section", "EFFICACY"],
    );
    assert!(success);
    assert!(stdout.contains("No templates registered."));
}

#[test]
fn test_template_scope_precedence() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");
    add_study(&config_path, "AB-102");

    let add_scoped = |name: &str, extra: &[&str]| {
        let mut args = vec![
            "template",
            "add",
            "--name",
            name,
            "--kind",
            "section",
            "--section",
            "SYNOPSIS",
            "--content",
            "Body for {{study_code}}",
        ];
        args.extend_from_slice(extra);
        let (stdout, stderr, success) = run_csr(&config_path, &args);
        assert!(success, "template add failed: {} {}", stdout, stderr);
    };

    add_scoped("global-syn", &[]);
    let (stdout, _, success) = run_csr(
        &config_path,
        &["render", "--study", "AB-102", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(stdout.contains("(global)"), "global wins alone: {}", stdout);

    add_scoped(
        "sponsor-syn",
        &["--scope", "sponsor", "--sponsor", "Abra Therapeutics"],
    );
    let (stdout, _, success) = run_csr(
        &config_path,
        &["render", "--study", "AB-102", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(
        stdout.contains("sponsor-syn v1 (sponsor)"),
        "sponsor beats global: {}",
        stdout
    );

    add_scoped("study-syn", &["--scope", "study", "--study", "AB-102"]);
    let (stdout, _, success) = run_csr(
        &config_path,
        &["render", "--study", "AB-102", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(
        stdout.contains("study-syn v1 (study)"),
        "study beats sponsor: {}",
        stdout
    );

    // The study-scoped template binds to AB-102 only; AB-101 still resolves
    // through its sponsor.
    let (stdout, _, success) = run_csr(
        &config_path,
        &["render", "--study", "AB-101", "--section", "SYNOPSIS"],
    );
    assert!(success);
    assert!(
        stdout.contains("sponsor-syn v1 (sponsor)"),
        "other study unaffected: {}",
        stdout
    );
}

#[test]
fn test_qc_flags_fresh_study_and_tracks_progress() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    let (stdout, stderr, success) = run_csr(&config_path, &["qc", "run", "--study", "AB-101"]);
    assert!(success, "qc run failed: {} {}", stdout, stderr);
    assert!(stdout.contains("QC run for study 'AB-101'"));
    assert!(stdout.contains("issues found: 5"), "one per section: {}", stdout);
    assert!(stdout.contains("errors:       5"));
    assert!(stdout.contains("warnings:     0"));
    assert!(stdout.contains("MISSING_CONTENT"));
    assert!(stdout.contains("section SYNOPSIS has no content"));

    let (_, _, success) = run_csr(
        &config_path,
        &[
            "edit",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--text",
            "A short synopsis.",
        ],
    );
    assert!(success);

    let (stdout, _, success) = run_csr(&config_path, &["qc", "run", "--study", "AB-101"]);
    assert!(success);
    assert!(stdout.contains("issues found: 5"));
    assert!(stdout.contains("errors:       4"));
    assert!(stdout.contains("warnings:     1"));
    assert!(
        stdout.contains("section SYNOPSIS has 17 chars, minimum is 400"),
        "minimum length finding: {}",
        stdout
    );

    // Runs append; the first run's issues are still on file.
    let (stdout, _, success) = run_csr(&config_path, &["qc", "issues", "--study", "AB-101"]);
    assert!(success);
    let rows = stdout.lines().filter(|l| !l.starts_with("ID")).count();
    assert_eq!(rows, 10, "issues from both runs: {}", stdout);
}

#[test]
fn test_qc_issue_filters() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");
    run_csr(&config_path, &["qc", "run", "--study", "AB-101"]);

    let (stdout, _, success) = run_csr(
        &config_path,
        &["qc", "issues", "--study", "AB-101", "--severity", "error"],
    );
    assert!(success);
    let rows = stdout.lines().filter(|l| !l.starts_with("ID")).count();
    assert_eq!(rows, 5, "all findings are errors: {}", stdout);

    let (stdout, _, success) = run_csr(
        &config_path,
        &["qc", "issues", "--study", "AB-101", "--severity", "warning"],
    );
    assert!(success);
    assert!(stdout.contains("No matching issues for study 'AB-101'."));

    let (stdout, _, success) = run_csr(
        &config_path,
        &["qc", "issues", "--study", "AB-101", "--status", "resolved"],
    );
    assert!(success);
    assert!(stdout.contains("No matching issues"));
}

#[test]
fn test_qc_resolve_flow() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");
    run_csr(&config_path, &["qc", "run", "--study", "AB-101"]);

    let (stdout, _, _) = run_csr(&config_path, &["qc", "issues", "--study", "AB-101"]);
    let issue_id = first_issue_id(&stdout);

    let (stdout, stderr, success) = run_csr(
        &config_path,
        &["qc", "resolve", &issue_id, "--by", "reviewer"],
    );
    assert!(success, "resolve failed: {} {}", stdout, stderr);
    assert!(stdout.contains(&format!("Resolved issue {}", issue_id)));
    assert!(stdout.contains("by:       reviewer"));

    let (stdout, _, _) = run_csr(
        &config_path,
        &["qc", "issues", "--study", "AB-101", "--status", "resolved"],
    );
    assert!(stdout.contains(&issue_id));
    let rows = stdout.lines().filter(|l| !l.starts_with("ID")).count();
    assert_eq!(rows, 1, "one resolved issue: {}", stdout);

    let (stdout, _, _) = run_csr(
        &config_path,
        &["qc", "issues", "--study", "AB-101", "--status", "open"],
    );
    let rows = stdout.lines().filter(|l| !l.starts_with("ID")).count();
    assert_eq!(rows, 4, "rest still open: {}", stdout);

    let (_, stderr, success) = run_csr(
        &config_path,
        &["qc", "resolve", &issue_id, "--by", "reviewer"],
    );
    assert!(!success, "double resolve must fail");
    assert!(stderr.contains("already resolved"), "stderr: {}", stderr);
}

#[test]
fn test_qc_reports_leftover_placeholders() {
    let (_tmp, config_path) = setup_test_env();
    run_csr(&config_path, &["init"]);
    add_study(&config_path, "AB-101");

    // Long enough to clear the minimum, but still carrying a marker.
    let text = format!("{} Conclusion: {{{{leftover}}}}.", long_text(450));
    let (_, _, success) = run_csr(
        &config_path,
        &[
            "edit",
            "--study",
            "AB-101",
            "--section",
            "SYNOPSIS",
            "--text",
            &text,
        ],
    );
    assert!(success);

    let (stdout, _, success) = run_csr(&config_path, &["qc", "run", "--study", "AB-101"]);
    assert!(success);
    assert!(stdout.contains("errors:       4"));
    assert!(stdout.contains("warnings:     1"));
    assert!(stdout.contains("PLACEHOLDER_LEAK"));
    assert!(
        stdout.contains("section SYNOPSIS still contains placeholders: leftover"),
        "placeholder finding: {}",
        stdout
    );
}
