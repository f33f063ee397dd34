//! End-to-end ingestion tests against the in-memory store.
//!
//! These drive [`Ingestor::run_ingestion`] through real extraction with
//! wrapped sources and stores that block, count or fail on demand.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use relay_ingest::capability::{CapabilityCache, CapabilityStatus};
use relay_ingest::config::parse_config;
use relay_ingest::extract::RecordExtractor;
use relay_ingest::ingest::{IngestSettings, Ingestor, RunOutcome};
use relay_ingest::models::{AddressRole, Channel, Message, MessageBatch, MessageWithParts};
use relay_ingest::source::dump::DumpSource;
use relay_ingest::source::{MessageSource, SourceRow, SourceTable};
use relay_ingest::store::memory::InMemoryStore;
use relay_ingest::store::{BatchOutcome, MessageStore};
use serde_json::{json, Value};
use tokio::sync::Notify;

const MARKERS: [&str; 2] = ["application/vnd.gsma.rcs", "rcs"];

fn dump(value: Value) -> Arc<DumpSource> {
    Arc::new(DumpSource::from_json_str(&value.to_string()).unwrap())
}

fn ingestor(
    source: Arc<dyn MessageSource>,
    store: Arc<dyn MessageStore>,
    settings: IngestSettings,
) -> Ingestor {
    let markers = MARKERS.iter().map(|m| m.to_string()).collect();
    let extractor = RecordExtractor::new(source, store.clone(), markers)
        .with_secondary(Arc::new(CapabilityCache::secondary(store.clone())));
    Ingestor::new(store, extractor, settings)
}

fn sms_rows(ids: std::ops::RangeInclusive<i64>) -> Vec<Value> {
    ids.map(|i| {
        json!({"_id": i, "address": "+15550001", "body": format!("sms {}", i), "date": 1_700_000_000_000i64 + i})
    })
    .collect()
}

fn find<'a>(items: &'a [MessageWithParts], channel: Channel) -> Vec<&'a MessageWithParts> {
    items.iter().filter(|m| m.message.channel == channel).collect()
}

// ─── Wrapped collaborators ──────────────────────────────────────────

/// Blocks the first SMS query until released.
struct GatedSource {
    inner: Arc<DumpSource>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    gated: AtomicBool,
    queries: AtomicUsize,
}

#[async_trait]
impl MessageSource for GatedSource {
    async fn query(
        &self,
        table: SourceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if table == SourceTable::Sms && !self.gated.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.query(table, after, limit).await
    }

    async fn parts_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        self.inner.parts_for(owner).await
    }

    async fn addresses_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        self.inner.addresses_for(owner).await
    }

    async fn open_part(&self, part_id: i64) -> Result<Option<Vec<u8>>> {
        self.inner.open_part(part_id).await
    }

    async fn probe_secondary(&self) -> Result<bool> {
        self.inner.probe_secondary().await
    }
}

/// Fails every query against one table; claims the secondary provider exists.
struct BrokenTable {
    inner: Arc<DumpSource>,
    broken: SourceTable,
}

#[async_trait]
impl MessageSource for BrokenTable {
    async fn query(
        &self,
        table: SourceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        if table == self.broken {
            bail!("{} table is unreadable", table.as_str());
        }
        self.inner.query(table, after, limit).await
    }

    async fn parts_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        self.inner.parts_for(owner).await
    }

    async fn addresses_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        self.inner.addresses_for(owner).await
    }

    async fn open_part(&self, part_id: i64) -> Result<Option<Vec<u8>>> {
        self.inner.open_part(part_id).await
    }

    async fn probe_secondary(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Fails the part sub-query for one multipart owner id.
struct BrokenParts {
    inner: Arc<DumpSource>,
    owner: i64,
}

#[async_trait]
impl MessageSource for BrokenParts {
    async fn query(
        &self,
        table: SourceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        self.inner.query(table, after, limit).await
    }

    async fn parts_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        if owner == self.owner {
            bail!("parts of {} are unreadable", owner);
        }
        self.inner.parts_for(owner).await
    }

    async fn addresses_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        self.inner.addresses_for(owner).await
    }

    async fn open_part(&self, part_id: i64) -> Result<Option<Vec<u8>>> {
        self.inner.open_part(part_id).await
    }

    async fn probe_secondary(&self) -> Result<bool> {
        self.inner.probe_secondary().await
    }
}

/// Counts commits and optionally rejects batches of one channel.
struct CountingStore {
    inner: InMemoryStore,
    commits: AtomicUsize,
    reject: Option<Channel>,
}

impl CountingStore {
    fn new(reject: Option<Channel>) -> Self {
        Self {
            inner: InMemoryStore::new(),
            commits: AtomicUsize::new(0),
            reject,
        }
    }

    fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for CountingStore {
    async fn insert_batch(&self, batch: &MessageBatch) -> Result<BatchOutcome> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if let Some(channel) = self.reject {
            if batch.messages.iter().any(|m| m.channel == channel) {
                bail!("disk full");
            }
        }
        self.inner.insert_batch(batch).await
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
        self.inner.delete_message(id).await
    }

    async fn clear_all(&self) -> Result<()> {
        self.inner.clear_all().await
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

// ─── Single flight ──────────────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_run_is_skipped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let source = Arc::new(GatedSource {
        inner: dump(json!({"sms": sms_rows(1..=3)})),
        entered: entered.clone(),
        release: release.clone(),
        gated: AtomicBool::new(false),
        queries: AtomicUsize::new(0),
    });
    let store = Arc::new(InMemoryStore::new());
    let ing = Arc::new(ingestor(
        source.clone(),
        store.clone(),
        IngestSettings::default(),
    ));

    let first = {
        let ing = ing.clone();
        tokio::spawn(async move { ing.run_ingestion(Some(Channel::Sms)).await })
    };
    entered.notified().await;
    assert!(ing.is_running());

    let queries_before = source.queries.load(Ordering::SeqCst);
    let second = ing.run_ingestion(None).await;
    assert_eq!(second, RunOutcome::Skipped);
    assert_eq!(source.queries.load(Ordering::SeqCst), queries_before);

    release.notify_one();
    let first = first.await.unwrap();
    assert!(!first.is_skipped());
    assert_eq!(first.report().unwrap().messages_inserted(), 3);
    assert!(!ing.is_running());

    // The guard is released: a later run proceeds normally.
    let third = ing.run_ingestion(Some(Channel::Sms)).await;
    assert!(!third.is_skipped());
    assert_eq!(store.message_count(), 3);
}

// ─── Batching and watermarks ────────────────────────────────────────

#[tokio::test]
async fn test_empty_channel_commits_nothing() {
    let store = Arc::new(CountingStore::new(None));
    let ing = ingestor(dump(json!({})), store.clone(), IngestSettings::default());

    let outcome = ing.run_ingestion(Some(Channel::Mms)).await;
    let mms = outcome.report().unwrap().channel(Channel::Mms).cloned().unwrap();
    assert_eq!(mms.rows_scanned, 0);
    assert_eq!(mms.batches_committed, 0);
    assert_eq!(store.commits(), 0);
}

#[tokio::test]
async fn test_watermark_advances_and_never_rereads() {
    let store = Arc::new(InMemoryStore::new());

    let first = ingestor(
        dump(json!({"sms": sms_rows(1..=3)})),
        store.clone(),
        IngestSettings::default(),
    );
    first.run_ingestion(Some(Channel::Sms)).await;
    assert_eq!(store.max_source_position(Channel::Sms).await.unwrap(), Some(3));

    // The provider gained rows 4 and 5; row 2 was edited in place.
    let mut rows = sms_rows(1..=5);
    rows[1] = json!({"_id": 2, "address": "+15550001", "body": "edited", "date": 1});
    let second = ingestor(
        dump(json!({"sms": rows})),
        store.clone(),
        IngestSettings::default(),
    );
    let outcome = second.run_ingestion(Some(Channel::Sms)).await;
    let sms = outcome.report().unwrap().channel(Channel::Sms).cloned().unwrap();

    assert_eq!(sms.watermark_before, Some(3));
    assert_eq!(sms.rows_scanned, 2);
    assert_eq!(sms.messages_inserted, 2);
    assert_eq!(sms.watermark_after, Some(5));
    assert_eq!(store.message_count(), 5);
    let bodies: Vec<Option<String>> = store
        .messages()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.body)
        .collect();
    assert!(!bodies.contains(&Some("edited".to_string())));
}

#[tokio::test]
async fn test_identical_content_stored_once() {
    let store = Arc::new(InMemoryStore::new());
    let row = |id: i64| json!({"_id": id, "address": "+1555", "body": "same", "date": 42});
    let ing = ingestor(
        dump(json!({"sms": [row(1), row(2)]})),
        store.clone(),
        IngestSettings::default(),
    );

    let outcome = ing.run_ingestion(Some(Channel::Sms)).await;
    let sms = outcome.report().unwrap().channel(Channel::Sms).cloned().unwrap();
    assert_eq!(sms.records_extracted, 2);
    assert_eq!(sms.messages_inserted, 1);
    assert_eq!(store.message_count(), 1);
}

// ─── Failure isolation ──────────────────────────────────────────────

#[tokio::test]
async fn test_commit_failure_is_isolated_to_its_channel() {
    let store = Arc::new(CountingStore::new(Some(Channel::Sms)));
    let ing = ingestor(
        dump(json!({
            "sms": sms_rows(1..=2),
            "mms": [{"_id": 9, "date": 1_700_000_000i64, "sub": "hello"}]
        })),
        store.clone(),
        IngestSettings::default(),
    );

    let outcome = ing.run_ingestion(None).await;
    let report = outcome.report().unwrap();
    assert!(report.has_errors());

    let sms = report.channel(Channel::Sms).unwrap();
    assert!(sms.error.as_deref().unwrap().contains("disk full"));
    assert_eq!(sms.messages_inserted, 0);
    assert_eq!(sms.watermark_after, None);

    let mms = report.channel(Channel::Mms).unwrap();
    assert!(mms.error.is_none());
    assert_eq!(mms.messages_inserted, 1);
    assert_eq!(store.max_source_position(Channel::Mms).await.unwrap(), Some(9));
}

#[tokio::test]
async fn test_source_failure_degrades_to_empty_page() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(BrokenTable {
        inner: dump(json!({
            "sms": sms_rows(1..=2),
            "mms": [{"_id": 4, "date": 1_700_000_000i64, "sub": "ok"}]
        })),
        broken: SourceTable::Sms,
    });
    let ing = ingestor(source, store.clone(), IngestSettings::default());

    let outcome = ing.run_ingestion(None).await;
    let report = outcome.report().unwrap();
    let sms = report.channel(Channel::Sms).unwrap();
    assert_eq!(sms.rows_scanned, 0);
    assert!(sms.error.is_none());
    assert_eq!(report.channel(Channel::Mms).unwrap().messages_inserted, 1);
}

#[tokio::test]
async fn test_sub_query_failure_holds_the_watermark() {
    let store = Arc::new(InMemoryStore::new());
    let header =
        |id: i64| json!({"_id": id, "date": 1_700_000_000i64 + id, "sub": format!("mms {}", id)});

    let first = ingestor(
        dump(json!({"mms": [header(4)]})),
        store.clone(),
        IngestSettings::default(),
    );
    first.run_ingestion(Some(Channel::Mms)).await;
    assert_eq!(store.max_source_position(Channel::Mms).await.unwrap(), Some(4));

    let source = Arc::new(BrokenParts {
        inner: dump(json!({
            "sms": sms_rows(1..=2),
            "mms": [header(4), header(5), header(6)],
            "mms_parts": [{"_id": 50, "mid": 5, "seq": 0, "ct": "image/png"}],
            "part_data": {"50": "AQID"}
        })),
        owner: 6,
    });
    let ing = ingestor(source, store.clone(), IngestSettings::default());

    let outcome = ing.run_ingestion(None).await;
    let report = outcome.report().unwrap();
    assert!(!report.has_errors());

    let mms = report.channel(Channel::Mms).unwrap();
    assert!(mms.error.is_none());
    assert_eq!(mms.rows_scanned, 0);
    assert_eq!(mms.batches_committed, 0);
    assert_eq!(mms.messages_inserted, 0);
    assert_eq!(mms.watermark_before, Some(4));
    assert_eq!(mms.watermark_after, mms.watermark_before);
    // Row 5 decoded, but the discarded page wrote none of its payloads.
    assert_eq!(store.blob("mms/part-50.png"), None);

    assert_eq!(report.channel(Channel::Sms).unwrap().messages_inserted, 2);
    let stored = store.messages().await.unwrap();
    assert_eq!(stored.iter().filter(|m| m.channel == Channel::Mms).count(), 1);
}

// ─── Multipart ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_multipart_end_to_end() {
    let smil = r#"<smil><body>
        <par dur="5000ms"><img src="cid:photo"/></par>
        <par dur="5000ms"><text src="text_0.txt"/></par>
    </body></smil>"#;
    let store = Arc::new(InMemoryStore::new());
    let ing = ingestor(
        dump(json!({
            "mms": [{"_id": 5, "date": 1_700_000_000i64, "thread_id": 3, "msg_box": 1,
                     "ct_t": "application/vnd.wap.multipart.related"}],
            "mms_parts": [
                {"_id": 50, "mid": 5, "seq": -1, "ct": "application/smil", "text": smil},
                {"_id": 51, "mid": 5, "seq": 0, "ct": "text/plain; charset=utf-8",
                 "text": "look", "cl": "text_0.txt"},
                {"_id": 52, "mid": 5, "seq": 1, "ct": "image/png", "cid": "<photo>",
                 "name": "IMG_1.png", "ctt_s": "3"}
            ],
            "mms_addr": [
                {"msg_id": 5, "address": "+1999", "type": 137},
                {"msg_id": 5, "address": "+1000", "type": 151},
                {"msg_id": 5, "address": "+1001", "type": 130},
                {"msg_id": 5, "address": "+1002", "type": 999}
            ],
            "part_data": {"52": "AQID"}
        })),
        store.clone(),
        IngestSettings::default(),
    );

    let outcome = ing.run_ingestion(Some(Channel::Mms)).await;
    let mms = outcome.report().unwrap().channel(Channel::Mms).cloned().unwrap();
    assert_eq!(mms.messages_inserted, 1);
    assert_eq!(mms.parts_inserted, 3);
    assert_eq!(mms.addresses_inserted, 3);

    let items = store.messages_with_parts().await.unwrap();
    let item = find(&items, Channel::Mms)[0];
    let msg = &item.message;
    assert_eq!(msg.address, "+1999");
    assert_eq!(msg.body.as_deref(), Some("look"));
    assert_eq!(msg.timestamp, 1_700_000_000_000);
    assert_eq!(msg.conversation_id, Some(3));
    assert_eq!(msg.render_order, vec!["52".to_string(), "51".to_string()]);

    let roles: Vec<AddressRole> = item.addresses.iter().map(|a| a.role).collect();
    assert!(roles.contains(&AddressRole::From));
    assert!(roles.contains(&AddressRole::To));
    assert!(roles.contains(&AddressRole::Cc));
    assert!(item.addresses.iter().all(|a| a.message_id == msg.id));

    for part in &item.parts {
        assert_eq!(part.message_id, msg.id);
        assert!(part.text.is_some() != part.stored_path.is_some());
    }
    let smil_part = item.parts.iter().find(|p| p.part_id == "50").unwrap();
    assert!(!smil_part.is_attachment);
    assert!(smil_part.text.as_deref().unwrap().contains("<smil>"));

    let image = item.parts.iter().find(|p| p.part_id == "52").unwrap();
    assert!(image.is_attachment);
    assert_eq!(image.transfer.size.as_deref(), Some("3"));
    let path = image.stored_path.as_deref().unwrap();
    assert_eq!(path, "memory://mms/part-52.png");
    assert_eq!(store.blob(path), Some(vec![1, 2, 3]));
}

// ─── Heuristic channel ──────────────────────────────────────────────

#[tokio::test]
async fn test_rcs_primary_and_secondary_passes() {
    let store = Arc::new(InMemoryStore::new());
    let source = dump(json!({
        "mms": [
            {"_id": 1, "date": 1_700_000_000i64, "ct_t": "application/vnd.wap.multipart.related"},
            {"_id": 2, "date": 1_700_000_100i64, "ct_t": "application/vnd.gsma.rcs-ft-http+xml"}
        ],
        "im_chat": [
            {"_id": 1, "address": "+1777", "body": "chat one", "date": 1_700_000_200_000i64},
            {"_id": 2, "address": "+1777", "body": "  ", "date": 1_700_000_300_000i64}
        ]
    }));
    let ing = ingestor(source, store.clone(), IngestSettings::default());

    let outcome = ing.run_ingestion(Some(Channel::Rcs)).await;
    let rcs = outcome.report().unwrap().channel(Channel::Rcs).cloned().unwrap();
    // Two multipart rows plus two chat rows.
    assert_eq!(rcs.rows_scanned, 4);
    assert_eq!(rcs.messages_inserted, 2);
    assert_eq!(rcs.watermark_after, Some(2));

    let messages = store.messages().await.unwrap();
    let candidate = messages.iter().find(|m| m.address == "<rcs:2>").unwrap();
    assert_eq!(
        candidate.body.as_deref(),
        Some("RCS candidate (application/vnd.gsma.rcs-ft-http+xml)")
    );
    let chat = messages.iter().find(|m| m.address == "+1777").unwrap();
    assert_eq!(chat.body.as_deref(), Some("chat one"));
    assert_eq!(chat.source_position, None);

    let status = CapabilityCache::secondary(store.clone()).status().await.unwrap();
    assert_eq!(status, CapabilityStatus::Available);

    // Chat rows are rescanned every run and deduplicated by identity.
    let again = ing.run_ingestion(Some(Channel::Rcs)).await;
    let rcs = again.report().unwrap().channel(Channel::Rcs).cloned().unwrap();
    assert_eq!(rcs.messages_inserted, 0);
    assert_eq!(store.message_count(), 2);
}

#[tokio::test]
async fn test_secondary_read_failure_disables_provider() {
    let store = Arc::new(InMemoryStore::new());
    let source = Arc::new(BrokenTable {
        inner: dump(json!({
            "mms": [{"_id": 3, "date": 1_700_000_000i64, "ct_t": "RCS/chat", "sub": "hey"}]
        })),
        broken: SourceTable::ImChat,
    });
    let ing = ingestor(source, store.clone(), IngestSettings::default());

    let outcome = ing.run_ingestion(Some(Channel::Rcs)).await;
    let rcs = outcome.report().unwrap().channel(Channel::Rcs).cloned().unwrap();
    assert!(rcs.error.is_none());
    assert_eq!(rcs.messages_inserted, 1);

    let cache = CapabilityCache::secondary(store.clone());
    assert_eq!(cache.status().await.unwrap(), CapabilityStatus::Unavailable);
    cache.reset().await.unwrap();
    assert_eq!(cache.status().await.unwrap(), CapabilityStatus::Unchecked);
}

#[tokio::test]
async fn test_secondary_disabled_by_config() {
    let config = parse_config(
        r#"
        [db]
        path = "unused.sqlite"

        [heuristic]
        secondary = false
        "#,
    )
    .unwrap();
    let store = Arc::new(InMemoryStore::new());
    let source = dump(json!({
        "im_chat": [{"_id": 1, "address": "+1777", "body": "chat", "date": 5}]
    }));
    let ing = Ingestor::from_config(&config, source, store.clone());

    let outcome = ing.run_ingestion(Some(Channel::Rcs)).await;
    let rcs = outcome.report().unwrap().channel(Channel::Rcs).cloned().unwrap();
    assert_eq!(rcs.rows_scanned, 0);
    assert_eq!(store.message_count(), 0);
    assert_eq!(store.get_meta("capability.im_provider.checked").await.unwrap(), None);
}
