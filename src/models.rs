//! Core data models shared across the pipeline.
//!
//! Every table row type lives here together with its `from_row` mapper so
//! query sites stay thin. Identifiers are UUID-v4 strings; timestamps are
//! Unix epoch seconds.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{Error, Result};

/// Root entity owning documents, chunks, and the report structure.
#[derive(Debug, Clone)]
pub struct Study {
    pub id: String,
    pub code: String,
    pub title: String,
    pub phase: Option<String>,
    pub indication: Option<String>,
    pub sponsor_name: Option<String>,
    pub status: String,
    pub created_at: i64,
}

impl Study {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            code: row.get("code"),
            title: row.get("title"),
            phase: row.get("phase"),
            indication: row.get("indication"),
            sponsor_name: row.get("sponsor_name"),
            status: row.get("status"),
            created_at: row.get("created_at"),
        }
    }
}

/// One uploaded file. Content is immutable; lifecycle metadata
/// (status, currency, index state) changes through archive/restore/reingest.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub study_id: String,
    pub doc_type: String,
    pub language: String,
    pub version_label: Option<String>,
    pub file_name: String,
    pub storage_path: String,
    pub content_hash: String,
    pub status: String,
    pub is_current: bool,
    pub index_enabled: bool,
    pub index_status: String,
    pub uploaded_by: String,
    pub uploaded_at: i64,
}

impl SourceDocument {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            study_id: row.get("study_id"),
            doc_type: row.get("doc_type"),
            language: row.get("language"),
            version_label: row.get("version_label"),
            file_name: row.get("file_name"),
            storage_path: row.get("storage_path"),
            content_hash: row.get("content_hash"),
            status: row.get("status"),
            is_current: row.get::<i64, _>("is_current") != 0,
            index_enabled: row.get::<i64, _>("index_enabled") != 0,
            index_status: row.get("index_status"),
            uploaded_by: row.get("uploaded_by"),
            uploaded_at: row.get("uploaded_at"),
        }
    }
}

/// One retrievable fragment of a document's extracted text.
/// `study_id` and `source_type` are denormalized for study-scoped queries.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub study_id: String,
    pub source_document_id: String,
    pub source_type: String,
    pub ordinal: i64,
    pub text: String,
}

impl Chunk {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            study_id: row.get("study_id"),
            source_document_id: row.get("source_document_id"),
            source_type: row.get("source_type"),
            ordinal: row.get("ordinal"),
            text: row.get("text"),
        }
    }
}

/// The normalized report document, one per study. `document_id` is the
/// external navigation handle minted when the structure is created.
#[derive(Debug, Clone)]
pub struct ReportStructure {
    pub id: String,
    pub study_id: String,
    pub document_id: Option<String>,
    pub title: String,
    pub status: String,
    pub language: String,
    pub created_at: i64,
}

impl ReportStructure {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            study_id: row.get("study_id"),
            document_id: row.get("document_id"),
            title: row.get("title"),
            status: row.get("status"),
            language: row.get("language"),
            created_at: row.get("created_at"),
        }
    }
}

/// A structural slot of the report. Content lives in versions, never here.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: String,
    pub structure_id: String,
    pub code: String,
    pub title: String,
    pub order_index: i64,
}

impl Section {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            structure_id: row.get("structure_id"),
            code: row.get("code"),
            title: row.get("title"),
            order_index: row.get("order_index"),
        }
    }
}

/// Origin of a section version. The template reference only exists on the
/// `Template` variant; the other origins carry nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    Human,
    Template { template_id: String },
    Generated,
}

impl Provenance {
    pub fn tag(&self) -> &'static str {
        match self {
            Provenance::Human => "human",
            Provenance::Template { .. } => "template",
            Provenance::Generated => "generated",
        }
    }

    pub fn template_id(&self) -> Option<&str> {
        match self {
            Provenance::Template { template_id } => Some(template_id),
            _ => None,
        }
    }

    /// Rebuild from the persisted tag + nullable template column.
    pub fn from_parts(tag: &str, template_id: Option<String>) -> Result<Self> {
        match tag {
            "human" => Ok(Provenance::Human),
            "generated" => Ok(Provenance::Generated),
            "template" => {
                let template_id = template_id.ok_or_else(|| {
                    Error::InvalidState(
                        "template provenance without template reference".to_string(),
                    )
                })?;
                Ok(Provenance::Template { template_id })
            }
            other => Err(Error::InvalidState(format!(
                "unknown provenance tag: {}",
                other
            ))),
        }
    }
}

/// Append-only history entry for one section.
#[derive(Debug, Clone)]
pub struct SectionVersion {
    pub id: String,
    pub section_id: String,
    pub text: String,
    pub provenance: Provenance,
    pub created_by: String,
    pub created_at: i64,
}

impl SectionVersion {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let tag: String = row.get("provenance");
        let template_id: Option<String> = row.get("template_id");
        Ok(Self {
            id: row.get("id"),
            section_id: row.get("section_id"),
            text: row.get("text"),
            provenance: Provenance::from_parts(&tag, template_id)?,
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
        })
    }
}

/// Reusable content or prompt generator with `{{variable}}` placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub section_code: String,
    pub language: String,
    pub scope: String,
    pub sponsor: Option<String>,
    pub study_id: Option<String>,
    pub content: String,
    pub variables: Vec<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub version: i64,
    pub created_at: i64,
}

impl Template {
    pub fn from_row(row: &SqliteRow) -> Self {
        let variables_json: String = row.get("variables_json");
        let variables: Vec<String> = serde_json::from_str(&variables_json).unwrap_or_default();
        Self {
            id: row.get("id"),
            name: row.get("name"),
            kind: row.get("kind"),
            section_code: row.get("section_code"),
            language: row.get("language"),
            scope: row.get("scope"),
            sponsor: row.get("sponsor"),
            study_id: row.get("study_id"),
            content: row.get("content"),
            variables,
            is_active: row.get::<i64, _>("is_active") != 0,
            is_default: row.get::<i64, _>("is_default") != 0,
            version: row.get("version"),
            created_at: row.get("created_at"),
        }
    }
}

/// One validation finding produced by a QC run.
#[derive(Debug, Clone)]
pub struct QcIssue {
    pub id: String,
    pub study_id: String,
    pub structure_id: String,
    pub section_id: Option<String>,
    pub rule_code: String,
    pub severity: String,
    pub status: String,
    pub message: String,
    pub created_at: i64,
    pub resolved_at: Option<i64>,
    pub resolved_by: Option<String>,
}

impl QcIssue {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            study_id: row.get("study_id"),
            structure_id: row.get("structure_id"),
            section_id: row.get("section_id"),
            rule_code: row.get("rule_code"),
            severity: row.get("severity"),
            status: row.get("status"),
            message: row.get("message"),
            created_at: row.get("created_at"),
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
        }
    }
}

/// Audit record for one generation attempt, success or failure.
#[derive(Debug, Clone)]
pub struct GenerationLogEntry {
    pub id: String,
    pub study_id: String,
    pub section_id: String,
    pub mode: String,
    pub prompt: String,
    pub generated_text: Option<String>,
    pub model: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub version_id: Option<String>,
    pub created_at: i64,
}

impl GenerationLogEntry {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            id: row.get("id"),
            study_id: row.get("study_id"),
            section_id: row.get("section_id"),
            mode: row.get("mode"),
            prompt: row.get("prompt"),
            generated_text: row.get("generated_text"),
            model: row.get("model"),
            success: row.get::<i64, _>("success") != 0,
            error: row.get("error"),
            version_id: row.get("version_id"),
            created_at: row.get("created_at"),
        }
    }
}
