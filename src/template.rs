//! Section and prompt templates: registry, scope resolution, rendering.
//!
//! Templates are plain text with `{{name}}` placeholders. Rendering is a
//! single substitution pass against the assembled context map; unknown
//! placeholders stay in the output verbatim and are reported so reviewers
//! can see what a draft is still missing. Resolution walks scopes from
//! most to least specific: study, then sponsor, then global.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::{Config, RetrievalConfig};
use crate::error::{Error, Result};
use crate::models::{Provenance, Section, SectionVersion, Study, Template};
use crate::{context, db, structure, study, versions};

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("placeholder pattern is valid"));

/// Result of one substitution pass.
pub struct RenderOutcome {
    pub text: String,
    /// Placeholders filled from the context, in first-seen order.
    pub used: Vec<String>,
    /// Placeholders left verbatim in the output, in first-seen order.
    pub missing: Vec<String>,
}

/// Substitute `{{name}}` placeholders from the context map.
pub fn render(content: &str, context: &HashMap<String, String>) -> RenderOutcome {
    let mut used: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    let text = PLACEHOLDER_RE
        .replace_all(content, |caps: &regex::Captures| {
            let name = &caps[1];
            match context.get(name) {
                Some(value) => {
                    if !used.iter().any(|u| u == name) {
                        used.push(name.to_string());
                    }
                    value.clone()
                }
                None => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    caps[0].to_string()
                }
            }
        })
        .into_owned();
    RenderOutcome { text, used, missing }
}

/// Distinct placeholder names in a text, in first-seen order.
pub fn placeholder_names(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(text) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Parameters for registering a template.
pub struct NewTemplate<'a> {
    pub name: &'a str,
    pub kind: &'a str,
    pub section_code: &'a str,
    pub language: &'a str,
    pub scope: &'a str,
    pub sponsor: Option<&'a str>,
    pub study_id: Option<&'a str>,
    pub content: &'a str,
    pub is_default: bool,
}

/// Register a template. The variable list is derived from the content.
/// Re-registering the same name for the same slot bumps the version.
pub async fn create_template(pool: &SqlitePool, tpl: NewTemplate<'_>) -> Result<Template> {
    let name = tpl.name.trim();
    if name.is_empty() {
        return Err(Error::InvalidState("template name must not be empty".into()));
    }
    match tpl.kind {
        "section" | "prompt" => {}
        other => {
            return Err(Error::InvalidState(format!(
                "unknown template kind '{}' (expected 'section' or 'prompt')",
                other
            )))
        }
    }
    match tpl.scope {
        "global" => {}
        "sponsor" if tpl.sponsor.is_some() => {}
        "sponsor" => {
            return Err(Error::InvalidState(
                "sponsor-scoped templates need --sponsor".into(),
            ))
        }
        "study" if tpl.study_id.is_some() => {}
        "study" => {
            return Err(Error::InvalidState(
                "study-scoped templates need --study".into(),
            ))
        }
        other => {
            return Err(Error::InvalidState(format!(
                "unknown template scope '{}' (expected 'global', 'sponsor' or 'study')",
                other
            )))
        }
    }

    let section_code = tpl.section_code.trim().to_uppercase();
    let language = tpl.language.trim().to_lowercase();
    let variables = placeholder_names(tpl.content);
    let variables_json = serde_json::to_string(&variables).unwrap_or_else(|_| "[]".to_string());

    let row = sqlx::query(
        "SELECT COALESCE(MAX(version), 0) AS v FROM templates
         WHERE name = ? AND kind = ? AND section_code = ? AND language = ?",
    )
    .bind(name)
    .bind(tpl.kind)
    .bind(&section_code)
    .bind(&language)
    .fetch_one(pool)
    .await?;
    let prior: i64 = row.get("v");

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO templates
         (id, name, kind, section_code, language, scope, sponsor, study_id, content,
          variables_json, is_active, is_default, version, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(tpl.kind)
    .bind(&section_code)
    .bind(&language)
    .bind(tpl.scope)
    .bind(tpl.sponsor)
    .bind(tpl.study_id)
    .bind(tpl.content)
    .bind(&variables_json)
    .bind(tpl.is_default as i64)
    .bind(prior + 1)
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    get_template(pool, &id).await
}

pub async fn get_template(pool: &SqlitePool, id: &str) -> Result<Template> {
    let row = sqlx::query("SELECT * FROM templates WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| Template::from_row(&r))
        .ok_or_else(|| Error::NotFound(format!("template {}", id)))
}

pub async fn list_templates(
    pool: &SqlitePool,
    section_code: Option<&str>,
) -> Result<Vec<Template>> {
    let rows = match section_code {
        Some(code) => {
            sqlx::query(
                "SELECT * FROM templates WHERE section_code = ?
                 ORDER BY kind ASC, scope ASC, name ASC, version DESC",
            )
            .bind(code.to_uppercase())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                "SELECT * FROM templates
                 ORDER BY section_code ASC, kind ASC, scope ASC, name ASC, version DESC",
            )
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows.iter().map(Template::from_row).collect())
}

/// Pick the template for a slot: study scope beats sponsor scope beats
/// global, defaults beat non-defaults, then higher version, then newest.
pub async fn resolve_template(
    pool: &SqlitePool,
    kind: &str,
    section_code: &str,
    language: &str,
    study: &Study,
) -> Result<Option<Template>> {
    let row = sqlx::query(
        "SELECT * FROM templates
         WHERE kind = ? AND section_code = ? AND language = ? AND is_active = 1
           AND (
                (scope = 'study' AND study_id = ?)
             OR (scope = 'sponsor' AND sponsor IS NOT NULL AND sponsor = ?)
             OR scope = 'global'
           )
         ORDER BY CASE scope WHEN 'study' THEN 0 WHEN 'sponsor' THEN 1 ELSE 2 END,
                  is_default DESC, version DESC, created_at DESC
         LIMIT 1",
    )
    .bind(kind)
    .bind(section_code.to_uppercase())
    .bind(language)
    .bind(&study.id)
    .bind(study.sponsor_name.as_deref().unwrap_or(""))
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| Template::from_row(&r)))
}

/// Render a section from its resolved template and append the result as a
/// new version with template provenance.
pub async fn render_section(
    pool: &SqlitePool,
    retrieval_cfg: &RetrievalConfig,
    study: &Study,
    section: &Section,
    language: &str,
    overrides: &HashMap<String, String>,
    created_by: &str,
) -> Result<(SectionVersion, RenderOutcome, Template)> {
    let template = resolve_template(pool, "section", &section.code, language, study)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "no active section template for {} ({})",
                section.code, language
            ))
        })?;

    let ctx = context::assemble_context(pool, retrieval_cfg, study, section, overrides).await?;
    let outcome = render(&template.content, &ctx);
    let version = versions::append_version(
        pool,
        &section.id,
        &outcome.text,
        &Provenance::Template {
            template_id: template.id.clone(),
        },
        created_by,
    )
    .await?;
    Ok((version, outcome, template))
}

/// CLI entry point for `csr template add`.
#[allow(clippy::too_many_arguments)]
pub async fn run_template_add(
    config: &Config,
    name: &str,
    kind: &str,
    section_code: &str,
    language: &str,
    scope: &str,
    sponsor: Option<String>,
    study_key: Option<String>,
    content: Option<String>,
    file: Option<PathBuf>,
    is_default: bool,
) -> anyhow::Result<()> {
    let content = match (content, file) {
        (Some(text), None) => text,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {}", path.display(), e))?,
        _ => anyhow::bail!("provide exactly one of --content or --file"),
    };

    let pool = db::connect(config).await?;
    let result = async {
        let study_id = match study_key.as_deref() {
            Some(key) => Some(study::resolve_study(&pool, key).await?.id),
            None => None,
        };
        create_template(
            &pool,
            NewTemplate {
                name,
                kind,
                section_code,
                language,
                scope,
                sponsor: sponsor.as_deref(),
                study_id: study_id.as_deref(),
                content: &content,
                is_default,
            },
        )
        .await
    }
    .await;
    pool.close().await;
    let template = result?;

    println!("Registered template '{}'", template.name);
    println!("  id:        {}", template.id);
    println!("  kind:      {}", template.kind);
    println!("  section:   {}", template.section_code);
    println!("  language:  {}", template.language);
    println!("  scope:     {}", template.scope);
    println!("  version:   {}", template.version);
    println!("  variables: {}", template.variables.join(", "));
    Ok(())
}

/// CLI entry point for `csr template list`.
pub async fn run_template_list(
    config: &Config,
    section_code: Option<String>,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = list_templates(&pool, section_code.as_deref()).await;
    pool.close().await;
    let templates = result?;

    if templates.is_empty() {
        println!("No templates registered. Add one with 'csr template add'.");
        return Ok(());
    }

    println!(
        "{:<24} {:<8} {:<10} {:<5} {:<8} {:>3}  ACTIVE",
        "NAME", "KIND", "SECTION", "LANG", "SCOPE", "VER"
    );
    for t in &templates {
        println!(
            "{:<24} {:<8} {:<10} {:<5} {:<8} {:>3}  {}",
            t.name,
            t.kind,
            t.section_code,
            t.language,
            t.scope,
            t.version,
            if t.is_active { "yes" } else { "no" },
        );
    }
    Ok(())
}

/// CLI entry point for `csr render`.
pub async fn run_render(
    config: &Config,
    study_key: &str,
    section_code: &str,
    vars: Vec<(String, String)>,
    author: Option<String>,
) -> anyhow::Result<()> {
    let overrides: HashMap<String, String> = vars.into_iter().collect();
    let created_by = author.unwrap_or_else(|| "local".to_string());

    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let structure = structure::resolve_for_study(&pool, &study).await?;
        let section = structure::get_section_by_code(&pool, &structure.id, section_code).await?;
        render_section(
            &pool,
            &config.retrieval,
            &study,
            &section,
            &structure.language,
            &overrides,
            &created_by,
        )
        .await
        .map(|(version, outcome, template)| (study, section, version, outcome, template))
    }
    .await;
    pool.close().await;
    let (study, section, version, outcome, template) = result?;

    println!(
        "Rendered section {} for study '{}'",
        section.code, study.code
    );
    println!("  template: {} v{} ({})", template.name, template.version, template.scope);
    println!("  version:  {}", version.id);
    println!(
        "  used:     {}",
        if outcome.used.is_empty() {
            "(none)".to_string()
        } else {
            outcome.used.join(", ")
        }
    );
    println!(
        "  missing:  {}",
        if outcome.missing.is_empty() {
            "(none)".to_string()
        } else {
            outcome.missing.join(", ")
        }
    );
    Ok(())
}
