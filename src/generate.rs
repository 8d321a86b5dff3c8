//! Section draft generation.
//!
//! One attempt walks a fixed path: assemble context, build the prompt,
//! dispatch to the configured backend, then record the outcome. Success
//! appends the draft as a generated version and writes a log row pointing
//! at it; failure writes a log row carrying the error and propagates it.
//! The log is the audit record reviewers rely on, so every attempt lands
//! there and nothing rewrites old rows.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{GenerationLogEntry, Provenance, Section, SectionVersion, Study};
use crate::{context, db, provider, structure, study, template, versions};

pub struct GenerateRequest<'a> {
    pub study_key: &'a str,
    pub section_code: &'a str,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub overrides: HashMap<String, String>,
    pub created_by: &'a str,
}

pub struct GenerateResult {
    pub study: Study,
    pub section: Section,
    pub version: SectionVersion,
    pub log_id: String,
    pub mode: String,
    pub model: String,
}

/// Run one generation attempt for a section.
pub async fn generate_section(
    pool: &SqlitePool,
    config: &Config,
    req: GenerateRequest<'_>,
) -> Result<GenerateResult> {
    let study = study::resolve_study(pool, req.study_key).await?;
    let structure = structure::resolve_for_study(pool, &study).await?;
    let section = structure::get_section_by_code(pool, &structure.id, req.section_code).await?;

    let ctx =
        context::assemble_context(pool, &config.retrieval, &study, &section, &req.overrides)
            .await?;
    let prompt = build_prompt(pool, config, &study, &section, &structure.language, &ctx).await?;

    let mode = config.generation.mode.clone();
    let max_tokens = req.max_tokens.unwrap_or(config.generation.max_tokens);
    let temperature = req.temperature.unwrap_or(config.generation.temperature);

    let outcome = match mode.as_str() {
        "stub" => Ok(provider::stub_generate(&study.code, &section.code, &prompt)),
        _ => provider::call_provider(&config.generation, &prompt, max_tokens, temperature).await,
    };

    match outcome {
        Ok(output) => {
            let version = versions::append_version(
                pool,
                &section.id,
                &output.text,
                &Provenance::Generated,
                req.created_by,
            )
            .await?;
            let log_id = insert_log(
                pool,
                LogRow {
                    study_id: &study.id,
                    section_id: &section.id,
                    mode: &mode,
                    prompt: &prompt,
                    generated_text: Some(&output.text),
                    model: Some(&output.model),
                    success: true,
                    error: None,
                    version_id: Some(&version.id),
                },
            )
            .await?;
            Ok(GenerateResult {
                study,
                section,
                version,
                log_id,
                mode,
                model: output.model,
            })
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(
                section_id = %section.id,
                mode = %mode,
                error = %message,
                "generation failed"
            );
            insert_log(
                pool,
                LogRow {
                    study_id: &study.id,
                    section_id: &section.id,
                    mode: &mode,
                    prompt: &prompt,
                    generated_text: None,
                    model: None,
                    success: false,
                    error: Some(&message),
                    version_id: None,
                },
            )
            .await?;
            Err(e)
        }
    }
}

/// A registered prompt template wins; otherwise a built-in skeleton prompt
/// names the study, the section, and the context blocks in relevance order.
async fn build_prompt(
    pool: &SqlitePool,
    config: &Config,
    study: &Study,
    section: &Section,
    language: &str,
    ctx: &HashMap<String, String>,
) -> Result<String> {
    if let Some(tpl) =
        template::resolve_template(pool, "prompt", &section.code, language, study).await?
    {
        return Ok(template::render(&tpl.content, ctx).text);
    }
    Ok(fallback_prompt(study, section, ctx))
}

fn fallback_prompt(study: &Study, section: &Section, ctx: &HashMap<String, String>) -> String {
    let mut prompt = format!(
        "Draft the {} section ({}) of the clinical study report for study {} ({}).\n",
        section.title, section.code, study.code, study.title
    );
    if let Some(ref phase) = study.phase {
        prompt.push_str(&format!("Study phase: {}.\n", phase));
    }
    if let Some(ref indication) = study.indication {
        prompt.push_str(&format!("Indication: {}.\n", indication));
    }
    prompt.push_str("Use only the source material below.\n");

    for source_type in context::relevance_order(&section.code) {
        let key = format!("context_{}", source_type);
        if let Some(text) = ctx.get(&key) {
            if !text.is_empty() {
                prompt.push_str(&format!("\n## {}\n{}\n", source_type.to_uppercase(), text));
            }
        }
    }
    prompt
}

struct LogRow<'a> {
    study_id: &'a str,
    section_id: &'a str,
    mode: &'a str,
    prompt: &'a str,
    generated_text: Option<&'a str>,
    model: Option<&'a str>,
    success: bool,
    error: Option<&'a str>,
    version_id: Option<&'a str>,
}

async fn insert_log(pool: &SqlitePool, row: LogRow<'_>) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO generation_log
         (id, study_id, section_id, mode, prompt, generated_text, model,
          success, error, version_id, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(row.study_id)
    .bind(row.section_id)
    .bind(row.mode)
    .bind(row.prompt)
    .bind(row.generated_text)
    .bind(row.model)
    .bind(row.success as i64)
    .bind(row.error)
    .bind(row.version_id)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(id)
}

/// Generation attempts for a study, newest first, optionally filtered to
/// one section.
pub async fn list_generation_log(
    pool: &SqlitePool,
    study_id: &str,
    section_id: Option<&str>,
    limit: i64,
) -> Result<Vec<GenerationLogEntry>> {
    let rows = match section_id {
        Some(sid) => {
            sqlx::query(
                "SELECT * FROM generation_log WHERE study_id = ? AND section_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(study_id)
            .bind(sid)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT * FROM generation_log WHERE study_id = ?
                 ORDER BY created_at DESC, id DESC LIMIT ?",
            )
            .bind(study_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(GenerationLogEntry::from_row).collect())
}

/// CLI entry point for `csr generate`.
pub async fn run_generate(
    config: &Config,
    study_key: &str,
    section_code: &str,
    max_tokens: Option<i64>,
    temperature: Option<f64>,
    vars: Vec<(String, String)>,
    author: Option<String>,
) -> anyhow::Result<()> {
    let created_by = author.unwrap_or_else(|| "local".to_string());
    let pool = db::connect(config).await?;
    let result = generate_section(
        &pool,
        config,
        GenerateRequest {
            study_key,
            section_code,
            max_tokens,
            temperature,
            overrides: vars.into_iter().collect(),
            created_by: &created_by,
        },
    )
    .await;
    pool.close().await;
    let generated = result?;

    println!(
        "Generated draft for section {} (study '{}')",
        generated.section.code, generated.study.code
    );
    println!("  mode:     {}", generated.mode);
    println!("  model:    {}", generated.model);
    println!("  version:  {}", generated.version.id);
    println!("  log:      {}", generated.log_id);
    Ok(())
}

/// CLI entry point for `csr log`.
pub async fn run_log(
    config: &Config,
    study_key: &str,
    section_code: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let str_ = structure::resolve_for_study(&pool, &study).await?;
        let sections = structure::list_sections(&pool, &str_.id).await?;
        let section_id = match section_code.as_deref() {
            Some(code) => Some(
                structure::get_section_by_code(&pool, &str_.id, code)
                    .await?
                    .id,
            ),
            None => None,
        };
        let entries =
            list_generation_log(&pool, &study.id, section_id.as_deref(), limit).await?;
        Ok::<_, Error>((study, sections, entries))
    }
    .await;
    pool.close().await;
    let (study, sections, entries) = result?;

    println!("--- Generation log (study {}) ---", study.code);
    if entries.is_empty() {
        println!("no generation attempts recorded");
        return Ok(());
    }

    let code_by_id: HashMap<&str, &str> = sections
        .iter()
        .map(|s| (s.id.as_str(), s.code.as_str()))
        .collect();

    println!("{:<20} {:<10} {:<6} {:<4} DETAIL", "CREATED", "SECTION", "MODE", "OK");
    for e in &entries {
        let code = code_by_id.get(e.section_id.as_str()).unwrap_or(&"?");
        let detail = if e.success {
            e.model.as_deref().unwrap_or("-").to_string()
        } else {
            format!("failed: {}", e.error.as_deref().unwrap_or("unknown"))
        };
        println!(
            "{:<20} {:<10} {:<6} {:<4} {}",
            format_ts_iso(e.created_at),
            code,
            e.mode,
            if e.success { "yes" } else { "no" },
            detail,
        );
    }
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn study() -> Study {
        Study {
            id: "s-1".to_string(),
            code: "AB-101".to_string(),
            title: "A Phase 2 Study".to_string(),
            phase: Some("2".to_string()),
            indication: Some("atopic dermatitis".to_string()),
            sponsor_name: None,
            status: "active".to_string(),
            created_at: 0,
        }
    }

    fn section() -> Section {
        Section {
            id: "sec-1".to_string(),
            structure_id: "str-1".to_string(),
            code: "SYNOPSIS".to_string(),
            title: "Synopsis".to_string(),
            order_index: 1,
        }
    }

    #[test]
    fn test_fallback_prompt_names_study_and_section() {
        let mut ctx = HashMap::new();
        ctx.insert(
            "context_protocol".to_string(),
            "Dosing is weekly.".to_string(),
        );
        ctx.insert("context_sap".to_string(), String::new());

        let prompt = fallback_prompt(&study(), &section(), &ctx);
        assert!(prompt.contains("AB-101"));
        assert!(prompt.contains("SYNOPSIS"));
        assert!(prompt.contains("Study phase: 2."));
        assert!(prompt.contains("## PROTOCOL"));
        assert!(prompt.contains("Dosing is weekly."));
    }

    #[test]
    fn test_fallback_prompt_omits_empty_context_blocks() {
        let mut ctx = HashMap::new();
        ctx.insert("context_protocol".to_string(), String::new());

        let prompt = fallback_prompt(&study(), &section(), &ctx);
        assert!(!prompt.contains("## PROTOCOL"));
        assert!(!prompt.contains("## SAP"));
    }

    #[test]
    fn test_fallback_prompt_orders_blocks_by_relevance() {
        let mut ctx = HashMap::new();
        ctx.insert("context_protocol".to_string(), "protocol text".to_string());
        ctx.insert(
            "context_csr_prev".to_string(),
            "previous report text".to_string(),
        );

        // The synopsis ordering puts the protocol before the previous report.
        let prompt = fallback_prompt(&study(), &section(), &ctx);
        let protocol_at = prompt.find("## PROTOCOL").unwrap();
        let prev_at = prompt.find("## CSR_PREV").unwrap();
        assert!(protocol_at < prev_at);
    }
}
