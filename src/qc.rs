//! Quality-control engine.
//!
//! Four built-in rules check the latest version of every section plus the
//! report structure itself. Each run appends its findings as new open
//! issues and never touches issues from earlier runs, so the issue table
//! is a running record of what every check pass saw. Rule definitions are
//! seeded into `qc_rules` on first run.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{QcIssue, Study};
use crate::{db, structure, study, template, versions};

/// Built-in rules: code, name, description, severity.
const RULES: [(&str, &str, &str, &str); 4] = [
    (
        "MISSING_CONTENT",
        "Missing content",
        "Section has no versions, or its latest version is empty",
        "error",
    ),
    (
        "MIN_LENGTH",
        "Below minimum length",
        "Latest version is shorter than the section's minimum length",
        "warning",
    ),
    (
        "PLACEHOLDER_LEAK",
        "Unresolved placeholders",
        "Latest version still contains {{placeholder}} markers",
        "warning",
    ),
    (
        "REQUIRED_SECTIONS",
        "Required sections present",
        "Report structure is missing a required section",
        "warning",
    ),
];

/// Sections a submittable report must contain.
const REQUIRED_SECTIONS: [&str; 3] = ["SYNOPSIS", "EFFICACY", "SAFETY"];

/// Minimum character count for a section's latest version.
fn min_length_for(section_code: &str) -> usize {
    match section_code {
        "SYNOPSIS" => 400,
        "EFFICACY" | "SAFETY" => 600,
        _ => 200,
    }
}

struct Finding {
    section_id: Option<String>,
    rule_code: &'static str,
    severity: &'static str,
    message: String,
}

async fn ensure_rules(pool: &SqlitePool) -> Result<()> {
    for (code, name, description, severity) in RULES {
        sqlx::query(
            "INSERT INTO qc_rules (code, name, description, severity, is_active)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT DO NOTHING",
        )
        .bind(code)
        .bind(name)
        .bind(description)
        .bind(severity)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Run the full rule battery against a study's report and persist every
/// finding as an open issue. Returns the issues created by this run.
pub async fn run_qc(pool: &SqlitePool, study: &Study) -> Result<Vec<QcIssue>> {
    ensure_rules(pool).await?;
    let str_ = structure::resolve_for_study(pool, study).await?;
    let sections = structure::list_sections(pool, &str_.id).await?;

    let mut findings: Vec<Finding> = Vec::new();

    for section in &sections {
        let latest = versions::latest_version(pool, &section.id).await?;
        match latest.as_ref().map(|v| v.text.as_str()) {
            None => findings.push(Finding {
                section_id: Some(section.id.clone()),
                rule_code: "MISSING_CONTENT",
                severity: "error",
                message: format!("section {} has no content", section.code),
            }),
            Some(text) if text.trim().is_empty() => findings.push(Finding {
                section_id: Some(section.id.clone()),
                rule_code: "MISSING_CONTENT",
                severity: "error",
                message: format!("section {} latest version is empty", section.code),
            }),
            Some(text) => {
                let len = text.chars().count();
                let min = min_length_for(&section.code);
                if len < min {
                    findings.push(Finding {
                        section_id: Some(section.id.clone()),
                        rule_code: "MIN_LENGTH",
                        severity: "warning",
                        message: format!(
                            "section {} has {} chars, minimum is {}",
                            section.code, len, min
                        ),
                    });
                }
                let leaked = template::placeholder_names(text);
                if !leaked.is_empty() {
                    findings.push(Finding {
                        section_id: Some(section.id.clone()),
                        rule_code: "PLACEHOLDER_LEAK",
                        severity: "warning",
                        message: format!(
                            "section {} still contains placeholders: {}",
                            section.code,
                            leaked.join(", ")
                        ),
                    });
                }
            }
        }
    }

    let present: HashSet<&str> = sections.iter().map(|s| s.code.as_str()).collect();
    let missing: Vec<&str> = REQUIRED_SECTIONS
        .iter()
        .copied()
        .filter(|code| !present.contains(code))
        .collect();
    if !missing.is_empty() {
        findings.push(Finding {
            section_id: None,
            rule_code: "REQUIRED_SECTIONS",
            severity: "warning",
            message: format!("report is missing required sections: {}", missing.join(", ")),
        });
    }

    let now = Utc::now().timestamp();
    let mut created = Vec::with_capacity(findings.len());
    for f in findings {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO qc_issues
             (id, study_id, structure_id, section_id, rule_code, severity, status, message, created_at)
             VALUES (?, ?, ?, ?, ?, ?, 'open', ?, ?)",
        )
        .bind(&id)
        .bind(&study.id)
        .bind(&str_.id)
        .bind(&f.section_id)
        .bind(f.rule_code)
        .bind(f.severity)
        .bind(&f.message)
        .bind(now)
        .execute(pool)
        .await?;
        created.push(QcIssue {
            id,
            study_id: study.id.clone(),
            structure_id: str_.id.clone(),
            section_id: f.section_id,
            rule_code: f.rule_code.to_string(),
            severity: f.severity.to_string(),
            status: "open".to_string(),
            message: f.message,
            created_at: now,
            resolved_at: None,
            resolved_by: None,
        });
    }
    Ok(created)
}

/// Issues for a study, newest first, optionally filtered by status and
/// severity.
pub async fn list_issues(
    pool: &SqlitePool,
    study_id: &str,
    status: Option<&str>,
    severity: Option<&str>,
) -> Result<Vec<QcIssue>> {
    let mut where_sql = String::from("study_id = ?");
    if status.is_some() {
        where_sql.push_str(" AND status = ?");
    }
    if severity.is_some() {
        where_sql.push_str(" AND severity = ?");
    }
    let sql = format!(
        "SELECT * FROM qc_issues WHERE {} ORDER BY created_at DESC, id DESC",
        where_sql
    );

    let mut query = sqlx::query(&sql).bind(study_id);
    if let Some(s) = status {
        query = query.bind(s);
    }
    if let Some(s) = severity {
        query = query.bind(s);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows.iter().map(QcIssue::from_row).collect())
}

/// Mark one issue resolved.
pub async fn resolve_issue(
    pool: &SqlitePool,
    issue_id: &str,
    resolved_by: &str,
) -> Result<QcIssue> {
    let row = sqlx::query("SELECT * FROM qc_issues WHERE id = ?")
        .bind(issue_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("issue {}", issue_id)))?;
    let issue = QcIssue::from_row(&row);
    if issue.status == "resolved" {
        return Err(Error::InvalidState(format!(
            "issue {} is already resolved",
            issue_id
        )));
    }

    sqlx::query(
        "UPDATE qc_issues SET status = 'resolved', resolved_at = ?, resolved_by = ? WHERE id = ?",
    )
    .bind(Utc::now().timestamp())
    .bind(resolved_by)
    .bind(issue_id)
    .execute(pool)
    .await?;

    let row = sqlx::query("SELECT * FROM qc_issues WHERE id = ?")
        .bind(issue_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("issue {}", issue_id)))?;
    Ok(QcIssue::from_row(&row))
}

/// CLI entry point for `csr qc run`.
pub async fn run_qc_run(config: &Config, study_key: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let issues = run_qc(&pool, &study).await?;
        Ok::<_, Error>((study, issues))
    }
    .await;
    pool.close().await;
    let (study, issues) = result?;

    let errors = issues.iter().filter(|i| i.severity == "error").count();
    let warnings = issues.iter().filter(|i| i.severity == "warning").count();

    println!("QC run for study '{}'", study.code);
    println!("  issues found: {}", issues.len());
    println!("  errors:       {}", errors);
    println!("  warnings:     {}", warnings);
    for issue in &issues {
        println!("  [{}] {:<18} {}", issue.severity, issue.rule_code, issue.message);
    }
    Ok(())
}

/// CLI entry point for `csr qc issues`.
pub async fn run_qc_issues(
    config: &Config,
    study_key: &str,
    status: Option<String>,
    severity: Option<String>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let str_ = structure::resolve_for_study(&pool, &study).await?;
        let sections = structure::list_sections(&pool, &str_.id).await?;
        let issues =
            list_issues(&pool, &study.id, status.as_deref(), severity.as_deref()).await?;
        Ok::<_, Error>((study, sections, issues))
    }
    .await;
    pool.close().await;
    let (study, sections, issues) = result?;

    if issues.is_empty() {
        println!("No matching issues for study '{}'.", study.code);
        return Ok(());
    }

    let code_by_id: HashMap<&str, &str> = sections
        .iter()
        .map(|s| (s.id.as_str(), s.code.as_str()))
        .collect();

    println!(
        "{:<36}  {:<8} {:<18} {:<9} {:<10} MESSAGE",
        "ID", "SEVERITY", "RULE", "STATUS", "SECTION"
    );
    for i in &issues {
        let section = i
            .section_id
            .as_deref()
            .and_then(|sid| code_by_id.get(sid).copied())
            .unwrap_or("-");
        println!(
            "{:<36}  {:<8} {:<18} {:<9} {:<10} {}",
            i.id, i.severity, i.rule_code, i.status, section, i.message
        );
    }
    Ok(())
}

/// CLI entry point for `csr qc resolve`.
pub async fn run_qc_resolve(
    config: &Config,
    issue_id: &str,
    by: Option<String>,
) -> anyhow::Result<()> {
    let resolved_by = by.unwrap_or_else(|| "local".to_string());
    let pool = db::connect(config).await?;
    let result = resolve_issue(&pool, issue_id, &resolved_by).await;
    pool.close().await;
    let issue = result?;

    println!("Resolved issue {}", issue.id);
    println!("  rule:     {}", issue.rule_code);
    println!("  by:       {}", resolved_by);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_lengths_by_section() {
        assert_eq!(min_length_for("SYNOPSIS"), 400);
        assert_eq!(min_length_for("EFFICACY"), 600);
        assert_eq!(min_length_for("SAFETY"), 600);
        assert_eq!(min_length_for("PK"), 200);
        assert_eq!(min_length_for("DISCUSSION"), 200);
    }
}
