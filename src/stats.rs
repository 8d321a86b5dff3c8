//! Database statistics and pipeline overview.
//!
//! Quick summary of what the pipeline holds: studies, documents and their
//! index states, chunk counts by source type, drafting activity, and open
//! QC issues. `csr stats` is the first stop when checking that uploads
//! and ingestion are behaving.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let studies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM studies")
        .fetch_one(&pool)
        .await?;
    let docs_active: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM source_documents WHERE status = 'active'")
            .fetch_one(&pool)
            .await?;
    let docs_archived: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM source_documents WHERE status = 'archived'")
            .fetch_one(&pool)
            .await?;
    let docs_indexed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM source_documents WHERE status = 'active' AND index_status = 'indexed'",
    )
    .fetch_one(&pool)
    .await?;
    let docs_error: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM source_documents WHERE status = 'active' AND index_status = 'error'",
    )
    .fetch_one(&pool)
    .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;
    let sections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sections")
        .fetch_one(&pool)
        .await?;
    let versions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM section_versions")
        .fetch_one(&pool)
        .await?;
    let open_issues: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM qc_issues WHERE status = 'open'")
            .fetch_one(&pool)
            .await?;
    let generations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generation_log")
        .fetch_one(&pool)
        .await?;
    let generations_failed: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM generation_log WHERE success = 0")
            .fetch_one(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.database.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("CSR Forge Database Stats");
    println!("========================");
    println!();
    println!("  Database:     {}", config.database.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Studies:      {}", studies);
    println!(
        "  Documents:    {} active, {} archived",
        docs_active, docs_archived
    );
    println!(
        "  Indexed:      {} / {} ({} errors)",
        docs_indexed, docs_active, docs_error
    );
    println!("  Chunks:       {}", chunks);
    println!();
    println!("  Sections:     {}", sections);
    println!("  Versions:     {}", versions);
    println!("  Open issues:  {}", open_issues);
    println!(
        "  Generations:  {} ({} failed)",
        generations, generations_failed
    );

    // Per-type breakdown over active documents
    let type_rows = sqlx::query(
        r#"
        SELECT
            d.doc_type AS source_type,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(c.id) AS chunk_count
        FROM source_documents d
        LEFT JOIN chunks c ON c.source_document_id = d.id
        WHERE d.status = 'active'
        GROUP BY d.doc_type
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !type_rows.is_empty() {
        println!();
        println!("  By source type:");
        println!("  {:<16} {:>6} {:>8}", "TYPE", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(34));
        for row in &type_rows {
            let source_type: String = row.get("source_type");
            println!(
                "  {:<16} {:>6} {:>8}",
                source_type,
                row.get::<i64, _>("doc_count"),
                row.get::<i64, _>("chunk_count")
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
