//! Chunk retrieval: filtered, paginated reads over the chunk index.
//!
//! Backs the `csr chunks` browsing command and feeds context assembly
//! with the leading chunks of each current source document.

use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::Chunk;
use crate::{db, study};

/// One page of chunk results plus the filter-wide total.
pub struct ChunkPage {
    pub total: i64,
    pub chunks: Vec<Chunk>,
}

/// Filter parameters for [`query_chunks`].
pub struct ChunkQuery<'a> {
    pub study_id: &'a str,
    pub source_type: Option<&'a str>,
    pub contains: Option<&'a str>,
    pub limit: i64,
    pub offset: i64,
}

/// Page through a study's chunks, optionally filtered by source type and
/// a case-insensitive substring match on the text.
pub async fn query_chunks(pool: &SqlitePool, query: ChunkQuery<'_>) -> Result<ChunkPage> {
    let mut where_sql = String::from("study_id = ?");
    if query.source_type.is_some() {
        where_sql.push_str(" AND source_type = ?");
    }
    if query.contains.is_some() {
        where_sql.push_str(" AND text LIKE ?");
    }
    let pattern = query.contains.map(|q| format!("%{}%", q));

    let count_sql = format!("SELECT COUNT(*) AS n FROM chunks WHERE {}", where_sql);
    let mut count_query = sqlx::query(&count_sql).bind(query.study_id);
    if let Some(st) = query.source_type {
        count_query = count_query.bind(st);
    }
    if let Some(ref p) = pattern {
        count_query = count_query.bind(p);
    }
    let total: i64 = count_query.fetch_one(pool).await?.get("n");

    let page_sql = format!(
        "SELECT * FROM chunks WHERE {}
         ORDER BY source_type ASC, source_document_id ASC, ordinal ASC
         LIMIT ? OFFSET ?",
        where_sql
    );
    let mut page_query = sqlx::query(&page_sql).bind(query.study_id);
    if let Some(st) = query.source_type {
        page_query = page_query.bind(st);
    }
    if let Some(ref p) = pattern {
        page_query = page_query.bind(p);
    }
    let rows = page_query
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(pool)
        .await?;

    Ok(ChunkPage {
        total,
        chunks: rows.iter().map(Chunk::from_row).collect(),
    })
}

/// Leading chunks of the current, active documents of one source type,
/// in ordinal order. Used when assembling generation context.
pub async fn current_chunks_for_type(
    pool: &SqlitePool,
    study_id: &str,
    source_type: &str,
    limit: i64,
) -> Result<Vec<Chunk>> {
    let rows = sqlx::query(
        "SELECT c.* FROM chunks c
         JOIN source_documents d ON d.id = c.source_document_id
         WHERE c.study_id = ? AND c.source_type = ?
           AND d.is_current = 1 AND d.status = 'active'
         ORDER BY c.ordinal ASC
         LIMIT ?",
    )
    .bind(study_id)
    .bind(source_type)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(Chunk::from_row).collect())
}

/// CLI entry point for `csr chunks`.
pub async fn run_chunks(
    config: &Config,
    study_key: &str,
    source_type: Option<String>,
    contains: Option<String>,
    limit: i64,
    offset: i64,
) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let result = async {
        let study = study::resolve_study(&pool, study_key).await?;
        let page = query_chunks(
            &pool,
            ChunkQuery {
                study_id: &study.id,
                source_type: source_type.as_deref(),
                contains: contains.as_deref(),
                limit,
                offset,
            },
        )
        .await?;
        Ok::<_, Error>(page)
    }
    .await;
    pool.close().await;
    let page = result?;

    println!("total: {}", page.total);
    for c in &page.chunks {
        let flat = c.text.replace('\n', " ");
        let preview: String = flat.chars().take(100).collect();
        let ellipsis = if flat.chars().count() > 100 { "..." } else { "" };
        println!("{:<10} {:>4}  {}{}", c.source_type, c.ordinal, preview, ellipsis);
    }
    Ok(())
}
