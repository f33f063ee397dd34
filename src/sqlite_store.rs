//! SQLite-backed [`MessageStore`] implementation.
//!
//! Messages, parts and addresses live in the `messages`, `mms_parts` and
//! `mms_addresses` tables created by [`crate::migrate`]. Attachment payloads
//! are written as plain files under the configured blob directory; the
//! database only records their paths.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use relay_core::models::{
    Address, Channel, Message, MessageBatch, MessageWithParts, Part, PartKind, TransferMetadata,
};
use relay_core::store::{BatchOutcome, MessageStore};

use crate::config::Config;
use crate::{db, migrate};

const MESSAGE_COLUMNS: &str = "id, channel, source_position, conversation_id, address, body, \
    timestamp, date_sent, read, msg_box, status, service_center, protocol, seen, locked, \
    error_code, subject, content_type, render_order, raw_json";

const PART_COLUMNS: &str = "part_id, message_id, seq, content_type, kind, is_attachment, text, \
    stored_path, name, filename, charset, content_id, content_location, size, transfer_type, \
    disposition";

/// SQLite implementation of the [`MessageStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    blob_dir: PathBuf,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, blob_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            blob_dir: blob_dir.into(),
        }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply_schema(&pool).await?;
        Ok(Self::new(pool, config.blob_dir()))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn blob_dir(&self) -> &Path {
        &self.blob_dir
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let id: String = row.get("id");
    let channel: String = row.get("channel");
    let render_order: String = row.get("render_order");
    let render_order = serde_json::from_str(&render_order)
        .with_context(|| format!("Bad render_order on message {}", id))?;
    Ok(Message {
        id,
        channel: channel.parse()?,
        source_position: row.get("source_position"),
        conversation_id: row.get("conversation_id"),
        address: row.get("address"),
        body: row.get("body"),
        timestamp: row.get("timestamp"),
        date_sent: row.get("date_sent"),
        read: row.get("read"),
        msg_box: row.get("msg_box"),
        status: row.get("status"),
        service_center: row.get("service_center"),
        protocol: row.get("protocol"),
        seen: row.get("seen"),
        locked: row.get("locked"),
        error_code: row.get("error_code"),
        subject: row.get("subject"),
        content_type: row.get("content_type"),
        render_order,
        raw_json: row.get("raw_json"),
    })
}

fn part_from_row(row: &SqliteRow) -> Result<Part> {
    let kind: String = row.get("kind");
    Ok(Part {
        part_id: row.get("part_id"),
        message_id: row.get("message_id"),
        seq: row.get("seq"),
        content_type: row.get("content_type"),
        kind: kind.parse::<PartKind>()?,
        is_attachment: row.get("is_attachment"),
        text: row.get("text"),
        stored_path: row.get("stored_path"),
        name: row.get("name"),
        filename: row.get("filename"),
        charset: row.get("charset"),
        content_id: row.get("content_id"),
        content_location: row.get("content_location"),
        transfer: TransferMetadata {
            size: row.get("size"),
            transfer_type: row.get("transfer_type"),
            disposition: row.get("disposition"),
        },
    })
}

fn address_from_row(row: &SqliteRow) -> Result<Address> {
    let role: String = row.get("role");
    Ok(Address {
        message_id: row.get("message_id"),
        address: row.get("address"),
        role: role.parse()?,
        charset: row.get("charset"),
    })
}

/// Blob keys are relative paths; reject anything that could escape the
/// blob directory.
fn checked_key(key: &str) -> Result<&Path> {
    let path = Path::new(key);
    if key.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("Invalid blob key: '{}'", key);
    }
    Ok(path)
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_batch(&self, batch: &MessageBatch) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        let insert_message = format!(
            "INSERT INTO messages ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
            MESSAGE_COLUMNS
        );
        let insert_part = format!(
            "INSERT INTO mms_parts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(part_id) DO NOTHING",
            PART_COLUMNS
        );
        let mut tx = self.pool.begin().await?;

        for msg in &batch.messages {
            let render_order = serde_json::to_string(&msg.render_order)?;
            let result = sqlx::query(&insert_message)
                .bind(&msg.id)
                .bind(msg.channel.as_str())
                .bind(msg.source_position)
                .bind(msg.conversation_id)
                .bind(&msg.address)
                .bind(&msg.body)
                .bind(msg.timestamp)
                .bind(msg.date_sent)
                .bind(msg.read)
                .bind(msg.msg_box)
                .bind(msg.status)
                .bind(&msg.service_center)
                .bind(msg.protocol)
                .bind(msg.seen)
                .bind(msg.locked)
                .bind(msg.error_code)
                .bind(&msg.subject)
                .bind(&msg.content_type)
                .bind(&render_order)
                .bind(&msg.raw_json)
                .execute(&mut *tx)
                .await?;
            outcome.messages += result.rows_affected();
        }

        for part in &batch.parts {
            let result = sqlx::query(&insert_part)
                .bind(&part.part_id)
                .bind(&part.message_id)
                .bind(part.seq)
                .bind(&part.content_type)
                .bind(part.kind.as_str())
                .bind(part.is_attachment)
                .bind(&part.text)
                .bind(&part.stored_path)
                .bind(&part.name)
                .bind(&part.filename)
                .bind(&part.charset)
                .bind(&part.content_id)
                .bind(&part.content_location)
                .bind(&part.transfer.size)
                .bind(&part.transfer.transfer_type)
                .bind(&part.transfer.disposition)
                .execute(&mut *tx)
                .await?;
            outcome.parts += result.rows_affected();
        }

        for addr in &batch.addresses {
            let result = sqlx::query(
                r#"
                INSERT INTO mms_addresses (message_id, address, role, charset)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(message_id, address, role) DO NOTHING
                "#,
            )
            .bind(&addr.message_id)
            .bind(&addr.address)
            .bind(addr.role.as_str())
            .bind(&addr.charset)
            .execute(&mut *tx)
            .await?;
            outcome.addresses += result.rows_affected();
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn max_source_position(&self, channel: Channel) -> Result<Option<i64>> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(source_position) FROM messages WHERE channel = ?")
                .bind(channel.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages ORDER BY timestamp DESC, id ASC",
            MESSAGE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn messages_with_parts(&self) -> Result<Vec<MessageWithParts>> {
        let messages = self.messages().await?;

        let part_rows = sqlx::query(&format!(
            "SELECT {} FROM mms_parts ORDER BY message_id, seq",
            PART_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut parts: HashMap<String, Vec<Part>> = HashMap::new();
        for row in &part_rows {
            let part = part_from_row(row)?;
            parts.entry(part.message_id.clone()).or_default().push(part);
        }

        let addr_rows = sqlx::query(
            "SELECT message_id, address, role, charset FROM mms_addresses ORDER BY message_id, rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut addresses: HashMap<String, Vec<Address>> = HashMap::new();
        for row in &addr_rows {
            let addr = address_from_row(row)?;
            addresses
                .entry(addr.message_id.clone())
                .or_default()
                .push(addr);
        }

        Ok(messages
            .into_iter()
            .map(|message| MessageWithParts {
                parts: parts.remove(&message.id).unwrap_or_default(),
                addresses: addresses.remove(&message.id).unwrap_or_default(),
                message,
            })
            .collect())
    }

    async fn delete_message(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_all(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM mms_addresses")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM mms_parts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM messages").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_blob(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.blob_dir.join(checked_key(key)?);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write blob {}", path.display()))?;
        Ok(path.display().to_string())
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM app_meta WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO app_meta (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM app_meta WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_key() {
        assert!(checked_key("mms/part-1.jpg").is_ok());
        assert!(checked_key("../escape").is_err());
        assert!(checked_key("/abs/path").is_err());
        assert!(checked_key("").is_err());
    }
}
