//! Source document registry.
//!
//! Uploaded files (protocols, SAPs, TLF packages, prior reports) land in
//! content-addressed storage under the configured root, with one registry
//! row per upload. At most one active document per (study, type, language)
//! slot is marked current; uploading into an occupied slot demotes the
//! previous holder inside the same transaction.

use std::path::Path;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::SourceDocument;
use crate::{db, ingest, study};

/// Parameters for registering one uploaded file.
pub struct UploadRequest<'a> {
    pub study_id: &'a str,
    pub doc_type: &'a str,
    pub language: &'a str,
    pub version_label: Option<&'a str>,
    pub uploaded_by: &'a str,
    pub file_name: &'a str,
    pub bytes: &'a [u8],
    pub index_enabled: bool,
}

/// Store the file under the storage root and insert its registry row,
/// taking over the current slot for (study, type, language).
pub async fn register_upload(
    pool: &SqlitePool,
    storage_root: &Path,
    req: UploadRequest<'_>,
) -> Result<SourceDocument> {
    let doc_type = req.doc_type.trim().to_lowercase();
    if doc_type.is_empty() {
        return Err(Error::InvalidState("document type must not be empty".into()));
    }
    let language = req.language.trim().to_lowercase();
    if language.is_empty() {
        return Err(Error::InvalidState("language must not be empty".into()));
    }
    let file_name = Path::new(req.file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidState(format!("invalid file name '{}'", req.file_name)))?;

    let id = Uuid::new_v4().to_string();
    let mut hasher = Sha256::new();
    hasher.update(req.bytes);
    let content_hash = format!("{:x}", hasher.finalize());
    let storage_path = format!("{}/{}_{}", req.study_id, id, file_name);
    let now = Utc::now().timestamp();

    let abs_path = storage_root.join(&storage_path);
    if let Some(parent) = abs_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&abs_path, req.bytes)?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "UPDATE source_documents SET is_current = 0
         WHERE study_id = ? AND doc_type = ? AND language = ? AND status = 'active'",
    )
    .bind(req.study_id)
    .bind(&doc_type)
    .bind(&language)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "INSERT INTO source_documents
         (id, study_id, doc_type, language, version_label, file_name, storage_path,
          content_hash, status, is_current, index_enabled, index_status, uploaded_by, uploaded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', 1, ?, 'not_indexed', ?, ?)",
    )
    .bind(&id)
    .bind(req.study_id)
    .bind(&doc_type)
    .bind(&language)
    .bind(req.version_label)
    .bind(file_name)
    .bind(&storage_path)
    .bind(&content_hash)
    .bind(req.index_enabled as i64)
    .bind(req.uploaded_by)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    get_document(pool, &id).await
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<SourceDocument> {
    let row = sqlx::query("SELECT * FROM source_documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| SourceDocument::from_row(&r))
        .ok_or_else(|| Error::NotFound(format!("document {}", id)))
}

pub async fn list_documents(
    pool: &SqlitePool,
    study_id: &str,
    include_archived: bool,
) -> Result<Vec<SourceDocument>> {
    let sql = if include_archived {
        "SELECT * FROM source_documents WHERE study_id = ?
         ORDER BY doc_type ASC, uploaded_at DESC"
    } else {
        "SELECT * FROM source_documents WHERE study_id = ? AND status = 'active'
         ORDER BY doc_type ASC, uploaded_at DESC"
    };
    let rows = sqlx::query(sql).bind(study_id).fetch_all(pool).await?;
    Ok(rows.iter().map(SourceDocument::from_row).collect())
}

/// Archive a document: its chunks leave the index in the same transaction
/// that marks it archived, so retrieval never sees a half-removed document.
pub async fn archive_document(pool: &SqlitePool, id: &str) -> Result<()> {
    let doc = get_document(pool, id).await?;
    if doc.status == "archived" {
        return Err(Error::InvalidState(format!(
            "document {} is already archived",
            id
        )));
    }

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM chunks WHERE source_document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE source_documents
         SET status = 'archived', is_current = 0, index_status = 'not_indexed'
         WHERE id = ?",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Reactivate an archived document. It reclaims the current slot only when
/// no other active document holds it, and stays unindexed until reingested.
pub async fn restore_document(pool: &SqlitePool, id: &str) -> Result<SourceDocument> {
    let doc = get_document(pool, id).await?;
    if doc.status != "archived" {
        return Err(Error::InvalidState(format!(
            "document {} is not archived",
            id
        )));
    }

    let mut tx = pool.begin().await?;
    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM source_documents
         WHERE study_id = ? AND doc_type = ? AND language = ?
           AND status = 'active' AND is_current = 1",
    )
    .bind(&doc.study_id)
    .bind(&doc.doc_type)
    .bind(&doc.language)
    .fetch_one(&mut *tx)
    .await?;
    let occupied: i64 = row.get("n");

    sqlx::query("UPDATE source_documents SET status = 'active', is_current = ? WHERE id = ?")
        .bind(if occupied == 0 { 1i64 } else { 0 })
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    get_document(pool, id).await
}

/// CLI entry point for `csr upload`.
#[allow(clippy::too_many_arguments)]
pub async fn run_upload(
    config: &Config,
    study_key: &str,
    file: &Path,
    doc_type: &str,
    language: &str,
    version_label: Option<String>,
    uploaded_by: Option<String>,
    no_index: bool,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(file)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", file.display(), e))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid file name: {}", file.display()))?;
    let uploaded_by = uploaded_by.unwrap_or_else(|| "local".to_string());

    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let doc = register_upload(
            &pool,
            &config.storage.root,
            UploadRequest {
                study_id: &study.id,
                doc_type,
                language,
                version_label: version_label.as_deref(),
                uploaded_by: &uploaded_by,
                file_name,
                bytes: &bytes,
                index_enabled: !no_index,
            },
        )
        .await?;
        Ok::<_, Error>((study, doc))
    }
    .await;

    let (study, doc) = match result {
        Ok(pair) => pair,
        Err(e) => {
            pool.close().await;
            return Err(e.into());
        }
    };

    println!("Uploaded {}", doc.file_name);
    println!("  id:        {}", doc.id);
    println!("  study:     {}", study.code);
    println!("  type:      {}", doc.doc_type);
    println!("  language:  {}", doc.language);
    println!("  hash:      {}", doc.content_hash);

    if doc.index_enabled {
        match ingest::ingest_document(config, &pool, &doc.id).await {
            Ok(count) => println!("  index:     indexed ({} chunks)", count),
            Err(e) => eprintln!("  index error: {}", e),
        }
    } else {
        println!("  index:     skipped (indexing disabled for this document)");
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `csr sources`.
pub async fn run_sources(config: &Config, study_key: &str, all: bool) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let docs = list_documents(&pool, &study.id, all).await?;
        Ok::<_, Error>((study, docs))
    }
    .await;
    pool.close().await;
    let (study, docs) = result?;

    if docs.is_empty() {
        println!("No source documents for study '{}'.", study.code);
        return Ok(());
    }

    println!(
        "{:<36}  {:<10} {:<5} {:<8} {:<9} {:<12} FILE",
        "ID", "TYPE", "LANG", "CURRENT", "STATUS", "INDEX"
    );
    for d in &docs {
        println!(
            "{:<36}  {:<10} {:<5} {:<8} {:<9} {:<12} {}",
            d.id,
            d.doc_type,
            d.language,
            if d.is_current { "yes" } else { "no" },
            d.status,
            d.index_status,
            d.file_name,
        );
    }
    Ok(())
}

/// CLI entry point for `csr archive`.
pub async fn run_archive(config: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = archive_document(&pool, id).await;
    pool.close().await;
    result?;

    println!("Archived document {}", id);
    println!("  its chunks were removed from the index");
    Ok(())
}

/// CLI entry point for `csr restore`.
pub async fn run_restore(config: &Config, id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = restore_document(&pool, id).await;
    pool.close().await;
    let doc = result?;

    println!("Restored document {}", id);
    println!("  current:  {}", if doc.is_current { "yes" } else { "no" });
    println!(
        "  index:    {} (run 'csr reingest --doc {}' to index)",
        doc.index_status, id
    );
    Ok(())
}
