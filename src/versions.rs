//! Append-only section version history.
//!
//! Section content is never edited in place: every change, whatever its
//! provenance, appends a row. `created_at` is forced strictly past the
//! section's latest version, so latest-by-timestamp stays unambiguous
//! even when appends land within the same second.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Provenance, SectionVersion};
use crate::{db, structure, study};

/// Append a new version of a section and return the stored row.
pub async fn append_version(
    pool: &SqlitePool,
    section_id: &str,
    text: &str,
    provenance: &Provenance,
    created_by: &str,
) -> Result<SectionVersion> {
    // Check the section explicitly; the FK alone reports an opaque error.
    let exists = sqlx::query("SELECT id FROM sections WHERE id = ?")
        .bind(section_id)
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(Error::NotFound(format!("section {}", section_id)));
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO section_versions
         (id, section_id, text, provenance, template_id, created_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?,
                 MAX(?, COALESCE((SELECT MAX(created_at) FROM section_versions
                                  WHERE section_id = ?), 0) + 1))",
    )
    .bind(&id)
    .bind(section_id)
    .bind(text)
    .bind(provenance.tag())
    .bind(provenance.template_id())
    .bind(created_by)
    .bind(Utc::now().timestamp())
    .bind(section_id)
    .execute(pool)
    .await?;

    get_version(pool, &id).await
}

pub async fn get_version(pool: &SqlitePool, id: &str) -> Result<SectionVersion> {
    let row = sqlx::query("SELECT * FROM section_versions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("version {}", id)))?;
    SectionVersion::from_row(&row)
}

/// Newest version of a section, or `None` for a section never written to.
pub async fn latest_version(
    pool: &SqlitePool,
    section_id: &str,
) -> Result<Option<SectionVersion>> {
    let row = sqlx::query(
        "SELECT * FROM section_versions WHERE section_id = ?
         ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(section_id)
    .fetch_optional(pool)
    .await?;
    row.map(|r| SectionVersion::from_row(&r)).transpose()
}

/// Version history, newest first.
pub async fn list_versions(
    pool: &SqlitePool,
    section_id: &str,
    limit: i64,
) -> Result<Vec<SectionVersion>> {
    let rows = sqlx::query(
        "SELECT * FROM section_versions WHERE section_id = ?
         ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(section_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(SectionVersion::from_row).collect()
}

/// CLI entry point for `csr edit`.
pub async fn run_edit(
    config: &Config,
    study_key: &str,
    section_code: &str,
    text: Option<String>,
    file: Option<std::path::PathBuf>,
    author: Option<String>,
) -> anyhow::Result<()> {
    let content = match (text, file) {
        (Some(t), None) => t,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?,
        _ => anyhow::bail!("provide exactly one of --text or --file"),
    };
    let created_by = author.unwrap_or_else(|| "local".to_string());

    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let str_ = structure::resolve_for_study(&pool, &study).await?;
        let section = structure::get_section_by_code(&pool, &str_.id, section_code).await?;
        let version =
            append_version(&pool, &section.id, &content, &Provenance::Human, &created_by).await?;
        Ok::<_, Error>((study, section, version))
    }
    .await;
    pool.close().await;
    let (study, section, version) = result?;

    println!("Saved section {} for study '{}'", section.code, study.code);
    println!("  version:  {}", version.id);
    println!("  author:   {}", version.created_by);
    println!("  length:   {} chars", version.text.chars().count());
    Ok(())
}

/// CLI entry point for `csr show`.
pub async fn run_show(
    config: &Config,
    study_key: &str,
    section_code: &str,
    history: bool,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let str_ = structure::resolve_for_study(&pool, &study).await?;
        let section = structure::get_section_by_code(&pool, &str_.id, section_code).await?;
        if history {
            let versions = list_versions(&pool, &section.id, 20).await?;
            Ok::<_, Error>((study, section, None, versions))
        } else {
            let latest = latest_version(&pool, &section.id).await?;
            Ok::<_, Error>((study, section, latest, Vec::new()))
        }
    }
    .await;
    pool.close().await;
    let (study, section, latest, versions) = result?;

    if history {
        println!(
            "--- History: section {} (study {}) ---",
            section.code, study.code
        );
        if versions.is_empty() {
            println!("no versions yet");
            return Ok(());
        }
        println!("{:<20} {:<36} {:<10} AUTHOR", "CREATED", "VERSION", "SOURCE");
        for v in &versions {
            println!(
                "{:<20} {:<36} {:<10} {}",
                format_ts_iso(v.created_at),
                v.id,
                v.provenance.tag(),
                v.created_by,
            );
        }
        return Ok(());
    }

    let version = match latest {
        Some(v) => v,
        None => {
            println!(
                "Section {} of study '{}' has no versions yet.",
                section.code, study.code
            );
            return Ok(());
        }
    };

    let provenance = match &version.provenance {
        Provenance::Template { template_id } => format!("template ({})", template_id),
        other => other.tag().to_string(),
    };

    println!("--- Section {} (study {}) ---", section.code, study.code);
    println!("version:     {}", version.id);
    println!("provenance:  {}", provenance);
    println!("author:      {}", version.created_by);
    println!("created_at:  {}", format_ts_iso(version.created_at));
    println!();
    println!("--- Text ---");
    println!("{}", version.text);
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
