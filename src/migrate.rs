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

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            channel TEXT NOT NULL,
            source_position INTEGER,
            conversation_id INTEGER,
            address TEXT NOT NULL,
            body TEXT,
            timestamp INTEGER NOT NULL,
            date_sent INTEGER,
            read INTEGER,
            msg_box INTEGER,
            status INTEGER,
            service_center TEXT,
            protocol INTEGER,
            seen INTEGER,
            locked INTEGER,
            error_code INTEGER,
            subject TEXT,
            content_type TEXT,
            render_order TEXT NOT NULL DEFAULT '[]',
            raw_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mms_parts (
            part_id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            seq INTEGER,
            content_type TEXT,
            kind TEXT NOT NULL,
            is_attachment INTEGER NOT NULL,
            text TEXT,
            stored_path TEXT,
            name TEXT,
            filename TEXT,
            charset TEXT,
            content_id TEXT,
            content_location TEXT,
            size TEXT,
            transfer_type TEXT,
            disposition TEXT,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mms_addresses (
            message_id TEXT NOT NULL,
            address TEXT NOT NULL,
            role TEXT NOT NULL,
            charset TEXT,
            UNIQUE(message_id, address, role),
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Key-value side channel (capability flags and the like)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_channel_position ON messages(channel, source_position)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mms_parts_message_id ON mms_parts(message_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mms_addresses_message_id ON mms_addresses(message_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
