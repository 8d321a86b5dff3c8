//! Context assembly for section rendering and generation.
//!
//! Builds the placeholder map handed to templates and prompts: study
//! metadata, section metadata, and one `context_<type>` block per source
//! document type. Which types lead depends on the section being drafted;
//! efficacy sections pull TLF output first, the synopsis starts from the
//! protocol. The total character budget is spent most-relevant-first, so
//! overflow trims the least relevant blocks.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::models::{Section, Study};
use crate::retrieval;

/// Canonical source document types consulted for every section.
pub const SOURCE_TYPES: [&str; 4] = ["protocol", "sap", "tlf", "csr_prev"];

/// Source types in descending relevance for the given section.
pub fn relevance_order(section_code: &str) -> [&'static str; 4] {
    match section_code.to_uppercase().as_str() {
        "SYNOPSIS" => ["protocol", "csr_prev", "sap", "tlf"],
        "EFFICACY" => ["tlf", "sap", "protocol", "csr_prev"],
        "SAFETY" => ["tlf", "protocol", "sap", "csr_prev"],
        "PK" => ["sap", "tlf", "protocol", "csr_prev"],
        _ => SOURCE_TYPES,
    }
}

/// Assemble the full placeholder map for one section of one study.
///
/// Every `context_<type>` key is present even when no chunks exist for
/// that type. Caller-supplied overrides win over everything else.
pub async fn assemble_context(
    pool: &SqlitePool,
    retrieval_cfg: &RetrievalConfig,
    study: &Study,
    section: &Section,
    overrides: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    map.insert("study_id".to_string(), study.id.clone());
    map.insert("study_code".to_string(), study.code.clone());
    map.insert("study_title".to_string(), study.title.clone());
    map.insert(
        "phase".to_string(),
        study.phase.clone().unwrap_or_default(),
    );
    map.insert(
        "indication".to_string(),
        study.indication.clone().unwrap_or_default(),
    );
    map.insert(
        "sponsor_name".to_string(),
        study.sponsor_name.clone().unwrap_or_default(),
    );
    map.insert("section_code".to_string(), section.code.clone());
    map.insert("section_title".to_string(), section.title.clone());

    let mut blocks: Vec<(String, String)> = Vec::new();
    for source_type in relevance_order(&section.code) {
        let chunks = retrieval::current_chunks_for_type(
            pool,
            &study.id,
            source_type,
            retrieval_cfg.chunks_per_source,
        )
        .await?;
        let joined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        blocks.push((source_type.to_string(), joined));
    }

    for (source_type, text) in budget_blocks(blocks, retrieval_cfg.max_context_chars) {
        map.insert(format!("context_{}", source_type), text);
    }

    for (key, value) in overrides {
        map.insert(key.clone(), value.clone());
    }

    Ok(map)
}

/// Spend the character budget across blocks in the order given. A block
/// past the budget boundary is cut at a char boundary; blocks after it
/// come back empty.
fn budget_blocks(blocks: Vec<(String, String)>, max_total_chars: usize) -> Vec<(String, String)> {
    let mut remaining = max_total_chars;
    blocks
        .into_iter()
        .map(|(source_type, text)| {
            let len = text.chars().count();
            let keep = len.min(remaining);
            remaining -= keep;
            let kept = if keep == len {
                text
            } else {
                text.chars().take(keep).collect()
            };
            (source_type, kept)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relevance_orders_per_section() {
        assert_eq!(
            relevance_order("SYNOPSIS"),
            ["protocol", "csr_prev", "sap", "tlf"]
        );
        assert_eq!(
            relevance_order("EFFICACY"),
            ["tlf", "sap", "protocol", "csr_prev"]
        );
        assert_eq!(
            relevance_order("SAFETY"),
            ["tlf", "protocol", "sap", "csr_prev"]
        );
        assert_eq!(relevance_order("PK"), ["sap", "tlf", "protocol", "csr_prev"]);
        // Unknown sections fall back to the default ordering
        assert_eq!(
            relevance_order("DISCUSSION"),
            ["protocol", "sap", "tlf", "csr_prev"]
        );
        assert_eq!(relevance_order("synopsis"), relevance_order("SYNOPSIS"));
    }

    #[test]
    fn test_budget_keeps_everything_when_it_fits() {
        let blocks = vec![
            ("a".to_string(), "xxxx".to_string()),
            ("b".to_string(), "yyyy".to_string()),
        ];
        let out = budget_blocks(blocks, 100);
        assert_eq!(out[0].1, "xxxx");
        assert_eq!(out[1].1, "yyyy");
    }

    #[test]
    fn test_budget_trims_least_relevant_first() {
        let blocks = vec![
            ("a".to_string(), "x".repeat(8)),
            ("b".to_string(), "y".repeat(8)),
            ("c".to_string(), "z".repeat(8)),
        ];
        let out = budget_blocks(blocks, 12);
        assert_eq!(out[0].1.len(), 8);
        assert_eq!(out[1].1.len(), 4);
        assert_eq!(out[2].1, "");
    }

    #[test]
    fn test_budget_cuts_at_char_boundary() {
        let blocks = vec![("a".to_string(), "é".repeat(10))];
        let out = budget_blocks(blocks, 4);
        assert_eq!(out[0].1.chars().count(), 4);
    }
}
