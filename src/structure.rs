//! Report structure normalizer.
//!
//! Each study has exactly one report structure, the skeleton the drafting
//! and QC commands work against. Everything that needs it goes through
//! [`resolve_for_study`], which creates the structure and its default
//! sections on first touch. A unique index on `study_id` turns concurrent
//! creation into insert-or-fetch: the loser of the race reads the winner's
//! row instead of erroring.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ReportStructure, Section, Study};
use crate::{db, study};

/// Default section plan, in reading order.
pub const DEFAULT_SECTIONS: [(&str, &str); 5] = [
    ("SYNOPSIS", "Synopsis"),
    ("EFFICACY", "Efficacy Results"),
    ("SAFETY", "Safety Results"),
    ("PK", "Pharmacokinetics"),
    ("DISCUSSION", "Discussion and Conclusions"),
];

/// Fetch the study's report structure, creating it (and its default
/// sections) if this is the first touch. Idempotent and race-safe.
pub async fn resolve_for_study(pool: &SqlitePool, study: &Study) -> Result<ReportStructure> {
    let structure = match fetch_by_study(pool, &study.id).await? {
        Some(existing) => existing,
        None => create_structure(pool, study).await?,
    };
    ensure_sections(pool, &structure.id).await?;
    Ok(structure)
}

async fn fetch_by_study(pool: &SqlitePool, study_id: &str) -> Result<Option<ReportStructure>> {
    let row = sqlx::query("SELECT * FROM report_structures WHERE study_id = ?")
        .bind(study_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| ReportStructure::from_row(&r)))
}

async fn create_structure(pool: &SqlitePool, study: &Study) -> Result<ReportStructure> {
    let id = Uuid::new_v4().to_string();
    let document_id = Uuid::new_v4().to_string();
    let title = format!("CSR for {}", study.code);

    let inserted = sqlx::query(
        "INSERT INTO report_structures
         (id, study_id, document_id, title, status, language, created_at)
         VALUES (?, ?, ?, ?, 'draft', 'en', ?)",
    )
    .bind(&id)
    .bind(&study.id)
    .bind(&document_id)
    .bind(&title)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => {
            tracing::info!(study_id = %study.id, structure_id = %id, "report structure created");
        }
        // Lost the creation race; the winner's row is canonical.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {}
        Err(e) => return Err(e.into()),
    }

    fetch_by_study(pool, &study.id).await?.ok_or_else(|| {
        Error::PersistenceConflict(format!(
            "report structure for study {} neither inserted nor readable",
            study.id
        ))
    })
}

/// Seed the default sections when the structure has none. The unique
/// (structure_id, code) index makes concurrent seeding collapse to one set.
async fn ensure_sections(pool: &SqlitePool, structure_id: &str) -> Result<()> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM sections WHERE structure_id = ?")
        .bind(structure_id)
        .fetch_one(pool)
        .await?;
    let count: i64 = row.get("n");
    if count > 0 {
        return Ok(());
    }

    for (order, (code, title)) in DEFAULT_SECTIONS.iter().enumerate() {
        sqlx::query(
            "INSERT INTO sections (id, structure_id, code, title, order_index)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(structure_id)
        .bind(code)
        .bind(title)
        .bind((order + 1) as i64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn list_sections(pool: &SqlitePool, structure_id: &str) -> Result<Vec<Section>> {
    let rows = sqlx::query("SELECT * FROM sections WHERE structure_id = ? ORDER BY order_index ASC")
        .bind(structure_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(Section::from_row).collect())
}

pub async fn get_section_by_code(
    pool: &SqlitePool,
    structure_id: &str,
    code: &str,
) -> Result<Section> {
    let code = code.trim().to_uppercase();
    let row = sqlx::query("SELECT * FROM sections WHERE structure_id = ? AND code = ?")
        .bind(structure_id)
        .bind(&code)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Section::from_row(&r))
        .ok_or_else(|| Error::NotFound(format!("section {}", code)))
}

/// CLI entry point for `csr sections`.
pub async fn run_sections(config: &Config, study_key: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let structure = resolve_for_study(&pool, &study).await?;
        let sections = list_sections(&pool, &structure.id).await?;
        Ok::<_, Error>((study, structure, sections))
    }
    .await;
    pool.close().await;
    let (study, structure, sections) = result?;

    println!("Report structure for study '{}'", study.code);
    println!("  id:        {}", structure.id);
    println!("  title:     {}", structure.title);
    println!("  status:    {}", structure.status);
    println!("  language:  {}", structure.language);
    println!();
    println!("{:<6} {:<12} TITLE", "ORDER", "CODE");
    for s in &sections {
        println!("{:<6} {:<12} {}", s.order_index, s.code, s.title);
    }
    Ok(())
}
