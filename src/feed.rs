//! Reactive message feed.
//!
//! [`ObservedStore`] wraps a [`MessageStore`] and notifies subscribers after
//! every write that changed message data. Each subscriber gets its own
//! delivery task: it receives the current snapshot as soon as it subscribes,
//! then a fresh snapshot after each change. Writers only bump a
//! `tokio::sync::watch` generation and never wait on subscribers; bursts of
//! writes coalesce into a single re-delivery.
//!
//! ```text
//! insert_batch ─▶ inner store ─▶ generation += 1 ─┬─▶ task A ─▶ handler A(snapshot)
//!                                                 └─▶ task B ─▶ handler B(snapshot)
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use relay_core::models::{Channel, Message, MessageBatch, MessageWithParts};
use relay_core::store::{BatchOutcome, MessageStore};

/// Store wrapper that publishes a change generation.
pub struct ObservedStore {
    inner: Arc<dyn MessageStore>,
    generation: watch::Sender<u64>,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn MessageStore>) -> Self {
        let (generation, _) = watch::channel(0);
        Self { inner, generation }
    }

    /// Number of data-changing writes observed so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    fn bump(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Deliver the newest-first message view to `handler` now and after
    /// every change, until the returned [`Subscription`] is cancelled or
    /// dropped. Calls to one handler never overlap.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(Vec<MessageWithParts>) + Send + 'static,
    {
        let mut changes = self.generation.subscribe();
        let store = self.inner.clone();

        let task = tokio::spawn(async move {
            loop {
                // Mark the current generation seen before reading, so a
                // write landing during the read triggers another delivery.
                changes.borrow_and_update();
                match store.messages_with_parts().await {
                    Ok(snapshot) => handler(snapshot),
                    Err(e) => warn!(error = %e, "feed snapshot failed"),
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        });

        Subscription { task }
    }
}

/// Handle to an active feed subscription.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(self) {
        // Drop aborts the delivery task.
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl MessageStore for ObservedStore {
    async fn insert_batch(&self, batch: &MessageBatch) -> Result<BatchOutcome> {
        let outcome = self.inner.insert_batch(batch).await?;
        if !outcome.is_empty() {
            self.bump();
        }
        Ok(outcome)
    }

    async fn max_source_position(&self, channel: Channel) -> Result<Option<i64>> {
        self.inner.max_source_position(channel).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        self.inner.messages().await
    }

    async fn messages_with_parts(&self) -> Result<Vec<MessageWithParts>> {
        self.inner.messages_with_parts().await
    }

    async fn delete_message(&self, id: &str) -> Result<bool> {
        let deleted = self.inner.delete_message(id).await?;
        if deleted {
            self.bump();
        }
        Ok(deleted)
    }

    async fn clear_all(&self) -> Result<()> {
        self.inner.clear_all().await?;
        self.bump();
        Ok(())
    }

    async fn put_blob(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.inner.put_blob(key, bytes).await
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_meta(key).await
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set_meta(key, value).await
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        self.inner.delete_meta(key).await
    }
}
