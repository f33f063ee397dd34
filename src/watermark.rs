//! Per-channel ingestion progress.
//!
//! The watermark of a channel is not stored anywhere: it is the highest
//! `source_position` among the channel's messages already in the store.

use std::sync::Arc;

use tracing::warn;

use relay_core::models::Channel;
use relay_core::store::MessageStore;

pub struct WatermarkTracker {
    store: Arc<dyn MessageStore>,
}

impl WatermarkTracker {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Highest ingested position of `channel`, `None` before the first
    /// ingest. A store failure is logged and reads as `None`, which at
    /// worst causes a re-scan that identity dedup absorbs.
    pub async fn highest_position(&self, channel: Channel) -> Option<i64> {
        match self.store.max_source_position(channel).await {
            Ok(position) => position,
            Err(e) => {
                warn!(channel = %channel, error = %e, "watermark read failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::models::{CandidateRecord, Message, MessageBatch};
    use relay_core::store::memory::InMemoryStore;

    #[tokio::test]
    async fn test_empty_store_has_no_watermark() {
        let tracker = WatermarkTracker::new(Arc::new(InMemoryStore::new()));
        for ch in Channel::ALL {
            assert_eq!(tracker.highest_position(ch).await, None);
        }
    }

    #[tokio::test]
    async fn test_watermark_ignores_unpositioned_messages() {
        let store = Arc::new(InMemoryStore::new());
        let mut batch = MessageBatch::new();
        let mut positioned = Message::new(Channel::Rcs, "<rcs:4>", 10);
        positioned.source_position = Some(4);
        batch.push(CandidateRecord::new(positioned).normalize());
        batch.push(CandidateRecord::new(Message::new(Channel::Rcs, "+1", 20)).normalize());
        store.insert_batch(&batch).await.unwrap();

        let tracker = WatermarkTracker::new(store);
        assert_eq!(tracker.highest_position(Channel::Rcs).await, Some(4));
    }
}
