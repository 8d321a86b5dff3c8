//! Document ingestion: extract text, clean it, split it, and index it.
//!
//! Chunk replacement is atomic. The delete of the old rows, the insert of
//! the new set, and the index status flip commit in one transaction, so
//! retrieval sees either the full old chunk set or the full new one. A
//! failure after extraction starts leaves the document in index status
//! `error` with its previous chunks intact.

use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::SourceDocument;
use crate::{chunker, db, documents, extract, study};

/// Documents with an ingestion in flight in this process.
static IN_FLIGHT: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Claim on a document's ingestion slot, released on drop.
struct IngestClaim {
    document_id: String,
}

impl IngestClaim {
    fn acquire(document_id: &str) -> Result<Self> {
        let mut set = IN_FLIGHT.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(document_id.to_string()) {
            return Err(Error::InvalidState(format!(
                "ingestion already in flight for document {}",
                document_id
            )));
        }
        Ok(Self {
            document_id: document_id.to_string(),
        })
    }
}

impl Drop for IngestClaim {
    fn drop(&mut self) {
        let mut set = IN_FLIGHT.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.document_id);
    }
}

/// Run the full ingestion pipeline for one document and return the number
/// of chunks indexed. A second call for the same document while one is in
/// flight fails immediately rather than queueing.
pub async fn ingest_document(
    config: &Config,
    pool: &SqlitePool,
    document_id: &str,
) -> Result<usize> {
    let _claim = IngestClaim::acquire(document_id)?;

    let doc = documents::get_document(pool, document_id).await?;
    if doc.status == "archived" {
        return Err(Error::InvalidState(format!(
            "document {} is archived and cannot be ingested",
            document_id
        )));
    }

    match ingest_inner(config, pool, &doc).await {
        Ok(count) => {
            tracing::info!(document_id, chunks = count, "document indexed");
            Ok(count)
        }
        Err(e) => {
            tracing::warn!(document_id, error = %e, "ingestion failed");
            mark_error(pool, document_id).await;
            Err(e)
        }
    }
}

async fn ingest_inner(config: &Config, pool: &SqlitePool, doc: &SourceDocument) -> Result<usize> {
    let path = config.storage.root.join(&doc.storage_path);
    let bytes = std::fs::read(&path)?;
    let text = extract::extract_text(&bytes, &doc.file_name)?;
    let cleaned = chunker::clean_text(&text);
    let chunks = chunker::split_chunks(
        &cleaned,
        config.chunking.max_chars,
        config.chunking.min_chars,
    );
    replace_chunks(pool, doc, &chunks).await?;
    Ok(chunks.len())
}

/// Swap the document's chunk set in one transaction.
async fn replace_chunks(pool: &SqlitePool, doc: &SourceDocument, chunks: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM chunks WHERE source_document_id = ?")
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;

    for (ordinal, text) in chunks.iter().enumerate() {
        sqlx::query(
            "INSERT INTO chunks (id, study_id, source_document_id, source_type, ordinal, text)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&doc.study_id)
        .bind(&doc.id)
        .bind(&doc.doc_type)
        .bind(ordinal as i64)
        .bind(text)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE source_documents SET index_status = 'indexed' WHERE id = ?")
        .bind(&doc.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Best-effort status update after a failed ingestion. The original error
/// is what the caller sees; a failure here is only logged.
async fn mark_error(pool: &SqlitePool, document_id: &str) {
    let res = sqlx::query("UPDATE source_documents SET index_status = 'error' WHERE id = ?")
        .bind(document_id)
        .execute(pool)
        .await;
    if let Err(e) = res {
        tracing::warn!(document_id, error = %e, "failed to record index error status");
    }
}

/// CLI entry point for `csr reingest --doc <id>`.
pub async fn run_reingest(config: &Config, document_id: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = ingest_document(config, &pool, document_id).await;
    pool.close().await;
    let count = result?;

    println!("Reingested document {}", document_id);
    println!("  chunks: {}", count);
    Ok(())
}

/// CLI entry point for `csr reingest --study <study>`: reprocess every
/// active, index-enabled document of a study. Failures are reported per
/// document and do not stop the sweep; the command exits nonzero if any
/// document failed.
pub async fn run_reingest_study(config: &Config, study_key: &str) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let listed = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let docs = documents::list_documents(&pool, &study.id, false).await?;
        Ok::<_, Error>((study, docs))
    }
    .await;

    let (study, docs) = match listed {
        Ok(pair) => pair,
        Err(e) => {
            pool.close().await;
            return Err(e.into());
        }
    };

    let mut processed = 0usize;
    let mut failures = 0usize;
    for doc in docs.iter().filter(|d| d.index_enabled) {
        match ingest_document(config, &pool, &doc.id).await {
            Ok(count) => {
                processed += 1;
                println!("{}  indexed ({} chunks)", doc.id, count);
            }
            Err(e) => {
                failures += 1;
                eprintln!("{}  failed: {}", doc.id, e);
            }
        }
    }
    pool.close().await;

    println!(
        "Reingested {} documents for study '{}' ({} failed)",
        processed, study.code, failures
    );
    if failures > 0 {
        anyhow::bail!("{} documents failed to ingest", failures);
    }
    Ok(())
}
