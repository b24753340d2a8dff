use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::index::SqliteIndex;

/// Create the state store and index schemas. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    apply_state_schema(&pool).await?;
    pool.close().await;

    let index = SqliteIndex::open(&config.index.path).await?;
    index.close().await;
    Ok(())
}

pub async fn apply_state_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One row per tracked item
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            identity TEXT PRIMARY KEY,
            source_locator TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            last_modified_ms INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            error_message TEXT,
            derived_id TEXT,
            unit_count INTEGER,
            duration_secs REAL,
            processed_at_ms INTEGER,
            registered_at_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only audit trail
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            message TEXT NOT NULL,
            FOREIGN KEY (identity) REFERENCES items(identity)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_status ON items(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processing_logs_identity ON processing_logs(identity, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
