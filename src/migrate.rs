use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Create the SQLite sink schema. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // One row per stored document; (index_name, id) is the create-only key
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            index_name TEXT NOT NULL,
            id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            parent TEXT,
            source_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (index_name, id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_doc_type ON documents(doc_type)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
