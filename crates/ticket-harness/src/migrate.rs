use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the ticket schema. Every statement is idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            document_key TEXT PRIMARY KEY,
            title TEXT,
            status TEXT,
            source_name TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `embedding` has no declared type: rows hold JSON text or f32 BLOBs.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fragments (
            document_key TEXT NOT NULL,
            kind TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding,
            embedding_model TEXT,
            content_hash TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (document_key, kind),
            FOREIGN KEY (document_key) REFERENCES documents(document_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
