use crate::config::Config;
use crate::db;
use crate::error::Result;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Create studies table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS studies (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL,
            title TEXT NOT NULL,
            phase TEXT,
            indication TEXT,
            sponsor_name TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at INTEGER NOT NULL,
            UNIQUE(code)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create source_documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_documents (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            version_label TEXT,
            file_name TEXT NOT NULL,
            storage_path TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            is_current INTEGER NOT NULL DEFAULT 1,
            index_enabled INTEGER NOT NULL DEFAULT 1,
            index_status TEXT NOT NULL DEFAULT 'not_indexed',
            uploaded_by TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            FOREIGN KEY (study_id) REFERENCES studies(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create chunks table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            source_document_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(source_document_id, ordinal),
            FOREIGN KEY (study_id) REFERENCES studies(id),
            FOREIGN KEY (source_document_id) REFERENCES source_documents(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create report_structures table.
    // UNIQUE(study_id) backs the normalizer's atomic insert-or-fetch.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS report_structures (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            document_id TEXT,
            title TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            language TEXT NOT NULL DEFAULT 'en',
            created_at INTEGER NOT NULL,
            UNIQUE(study_id),
            FOREIGN KEY (study_id) REFERENCES studies(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create sections table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sections (
            id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            code TEXT NOT NULL,
            title TEXT NOT NULL,
            order_index INTEGER NOT NULL,
            UNIQUE(structure_id, code),
            UNIQUE(structure_id, order_index),
            FOREIGN KEY (structure_id) REFERENCES report_structures(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create section_versions table (append-only)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS section_versions (
            id TEXT PRIMARY KEY,
            section_id TEXT NOT NULL,
            text TEXT NOT NULL,
            provenance TEXT NOT NULL,
            template_id TEXT,
            created_by TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (section_id) REFERENCES sections(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create templates table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS templates (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'section',
            section_code TEXT NOT NULL,
            language TEXT NOT NULL DEFAULT 'en',
            scope TEXT NOT NULL DEFAULT 'global',
            sponsor TEXT,
            study_id TEXT,
            content TEXT NOT NULL,
            variables_json TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_default INTEGER NOT NULL DEFAULT 0,
            version INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create qc_rules table (rows seeded by the QC engine on first run)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qc_rules (
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            severity TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create qc_issues table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qc_issues (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            structure_id TEXT NOT NULL,
            section_id TEXT,
            rule_code TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            resolved_at INTEGER,
            resolved_by TEXT,
            FOREIGN KEY (structure_id) REFERENCES report_structures(id),
            FOREIGN KEY (section_id) REFERENCES sections(id),
            FOREIGN KEY (rule_code) REFERENCES qc_rules(code)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create generation_log table (append-only audit trail)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS generation_log (
            id TEXT PRIMARY KEY,
            study_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            prompt TEXT NOT NULL,
            generated_text TEXT,
            model TEXT,
            success INTEGER NOT NULL,
            error TEXT,
            version_id TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (study_id) REFERENCES studies(id),
            FOREIGN KEY (section_id) REFERENCES sections(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_documents_study ON source_documents(study_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(source_document_id, ordinal)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_study_type ON chunks(study_id, source_type)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_section_versions_section ON section_versions(section_id, created_at DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_qc_issues_study ON qc_issues(study_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_generation_log_section ON generation_log(section_id, created_at DESC)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
