//! Storage abstraction for Relay.
//!
//! The [`MessageStore`] trait is the persistence collaborator of the
//! ingestion engine: batched insert-if-absent commits, per-channel
//! watermark queries, the ordered message view, a blob area for
//! attachment payloads, and a small key-value side channel.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Channel, Message, MessageBatch, MessageWithParts};

/// Rows actually inserted by one [`MessageStore::insert_batch`] call.
///
/// Rows whose key already exists are ignored and not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub messages: u64,
    pub parts: u64,
    pub addresses: u64,
}

impl BatchOutcome {
    pub fn is_empty(&self) -> bool {
        self.messages == 0 && self.parts == 0 && self.addresses == 0
    }
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_batch`](MessageStore::insert_batch) | Commit messages, parts and addresses atomically, ignoring conflicts |
/// | [`max_source_position`](MessageStore::max_source_position) | Highest ingested source position of a channel |
/// | [`messages`](MessageStore::messages) | All messages, newest first |
/// | [`messages_with_parts`](MessageStore::messages_with_parts) | Messages joined with parts and addresses |
/// | [`delete_message`](MessageStore::delete_message) | Remove a message and, transitively, its parts and addresses |
/// | [`put_blob`](MessageStore::put_blob) | Externalize an attachment payload, returning its stored path |
/// | [`get_meta`](MessageStore::get_meta) / [`set_meta`](MessageStore::set_meta) | Key-value side channel |
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a batch in one transaction. Messages conflict on `id`, parts
    /// on `part_id`, addresses on `(message_id, address, role)`.
    async fn insert_batch(&self, batch: &MessageBatch) -> Result<BatchOutcome>;

    /// `max(source_position)` over messages of `channel`, `None` when the
    /// channel has nothing positioned yet.
    async fn max_source_position(&self, channel: Channel) -> Result<Option<i64>>;

    /// All messages ordered by `timestamp` descending (ties by id).
    async fn messages(&self) -> Result<Vec<Message>>;

    /// Like [`messages`](MessageStore::messages), joined with parts (by
    /// `seq`) and addresses.
    async fn messages_with_parts(&self) -> Result<Vec<MessageWithParts>>;

    /// Returns `true` if a message was removed.
    async fn delete_message(&self, id: &str) -> Result<bool>;

    /// Remove all messages, parts and addresses. Metadata and blobs survive.
    async fn clear_all(&self) -> Result<()>;

    /// Store an attachment payload under `key`, overwriting any previous
    /// payload, and return the location recorded as `Part::stored_path`.
    async fn put_blob(&self, key: &str, bytes: &[u8]) -> Result<String>;

    async fn get_meta(&self, key: &str) -> Result<Option<String>>;

    async fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    async fn delete_meta(&self, key: &str) -> Result<()>;
}
