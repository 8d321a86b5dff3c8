//! Study registry: create, look up, and list clinical studies.
//!
//! Studies anchor every other record in the database. CLI commands that
//! act on a study accept either its code (e.g. `ABC-123`) or its id.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::{Error, Result};
use crate::models::Study;

/// Register a new study. Codes are unique across the database.
pub async fn create_study(
    pool: &SqlitePool,
    code: &str,
    title: &str,
    phase: Option<&str>,
    indication: Option<&str>,
    sponsor_name: Option<&str>,
) -> Result<Study> {
    let code = code.trim();
    if code.is_empty() {
        return Err(Error::InvalidState("study code must not be empty".into()));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now().timestamp();

    let inserted = sqlx::query(
        "INSERT INTO studies (id, code, title, phase, indication, sponsor_name, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(code)
    .bind(title)
    .bind(phase)
    .bind(indication)
    .bind(sponsor_name)
    .bind(now)
    .execute(pool)
    .await;

    match inserted {
        Ok(_) => get_study(pool, &id).await,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(Error::InvalidState(
            format!("a study with code '{}' already exists", code),
        )),
        Err(e) => Err(e.into()),
    }
}

pub async fn get_study(pool: &SqlitePool, id: &str) -> Result<Study> {
    let row = sqlx::query("SELECT * FROM studies WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Study::from_row(&r))
        .ok_or_else(|| Error::NotFound(format!("study {}", id)))
}

/// Look up a study by its code or, failing that, by its id.
pub async fn resolve_study(pool: &SqlitePool, key: &str) -> Result<Study> {
    let row = sqlx::query("SELECT * FROM studies WHERE code = ? OR id = ?")
        .bind(key)
        .bind(key)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Study::from_row(&r))
        .ok_or_else(|| Error::NotFound(format!("study '{}'", key)))
}

pub async fn list_studies(pool: &SqlitePool) -> Result<Vec<Study>> {
    let rows = sqlx::query("SELECT * FROM studies ORDER BY code ASC")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(Study::from_row).collect())
}

/// CLI entry point for `csr study add`.
pub async fn run_study_add(
    config: &Config,
    code: &str,
    title: &str,
    phase: Option<String>,
    indication: Option<String>,
    sponsor: Option<String>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = create_study(
        &pool,
        code,
        title,
        phase.as_deref(),
        indication.as_deref(),
        sponsor.as_deref(),
    )
    .await;
    pool.close().await;
    let study = result?;

    println!("Created study '{}'", study.code);
    println!("  id:          {}", study.id);
    println!("  title:       {}", study.title);
    if let Some(ref phase) = study.phase {
        println!("  phase:       {}", phase);
    }
    if let Some(ref indication) = study.indication {
        println!("  indication:  {}", indication);
    }
    if let Some(ref sponsor) = study.sponsor_name {
        println!("  sponsor:     {}", sponsor);
    }
    Ok(())
}

/// CLI entry point for `csr study list`.
pub async fn run_study_list(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = list_studies(&pool).await;
    pool.close().await;
    let studies = result?;

    if studies.is_empty() {
        println!("No studies registered. Add one with 'csr study add'.");
        return Ok(());
    }

    println!("{:<14} {:<8} {:<44} SPONSOR", "CODE", "PHASE", "TITLE");
    for s in &studies {
        println!(
            "{:<14} {:<8} {:<44} {}",
            s.code,
            s.phase.as_deref().unwrap_or("-"),
            s.title,
            s.sponsor_name.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
