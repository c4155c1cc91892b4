use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the candidate-store schema. Idempotent; ingestion of rows is owned
/// by external jobs, this service only reads.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;

    // Record the configured embedding identity so `ask2 check` and the
    // startup parity assertion have something to compare against.
    if let (Some(model), Some(dims)) = (&config.embedding.model, config.embedding.dims) {
        sqlx::query(
            r#"
            INSERT INTO corpus_meta (id, embedding_model, embedding_dims)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(model)
        .bind(dims as i64)
        .execute(&pool)
        .await?;
    }

    pool.close().await;
    Ok(())
}

/// Table and index creation, separated so tests can build a store on any pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Documents table: one row per retrievable chunk
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            docset TEXT NOT NULL,
            ticker TEXT,
            company TEXT,
            url TEXT,
            title TEXT,
            source_name TEXT NOT NULL,
            source_id TEXT,
            doc_id TEXT,
            published_at TEXT,
            snippet TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Corpus embedding identity (singleton row)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corpus_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            embedding_model TEXT NOT NULL,
            embedding_dims INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes for the metadata pre-filters
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_docset ON documents(docset)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_ticker ON documents(ticker)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source_name ON documents(source_name)")
        .execute(pool)
        .await?;

    Ok(())
}
