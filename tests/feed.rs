//! Reactive feed tests: replay on subscribe, redelivery after writes,
//! cancellation, and observation of a full ingestion run.

use std::sync::Arc;
use std::time::Duration;

use relay_ingest::extract::RecordExtractor;
use relay_ingest::feed::ObservedStore;
use relay_ingest::ingest::{IngestSettings, Ingestor};
use relay_ingest::models::{CandidateRecord, Channel, Message, MessageBatch, MessageWithParts};
use relay_ingest::source::dump::DumpSource;
use relay_ingest::store::memory::InMemoryStore;
use relay_ingest::store::MessageStore;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn batch_of(bodies: &[&str]) -> MessageBatch {
    let mut batch = MessageBatch::new();
    for (i, body) in bodies.iter().enumerate() {
        let mut msg = Message::new(Channel::Sms, "+1555", 1_000 + i as i64);
        msg.body = Some(body.to_string());
        batch.push(CandidateRecord::new(msg).normalize());
    }
    batch
}

fn collector() -> (
    impl FnMut(Vec<MessageWithParts>) + Send + 'static,
    mpsc::UnboundedReceiver<Vec<MessageWithParts>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |snapshot: Vec<MessageWithParts>| {
        let _ = tx.send(snapshot);
    };
    (handler, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Vec<MessageWithParts>>) -> Vec<MessageWithParts> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no delivery within timeout")
        .expect("feed closed")
}

#[tokio::test]
async fn test_subscriber_receives_current_state_first() {
    let inner = Arc::new(InMemoryStore::new());
    inner.insert_batch(&batch_of(&["existing"])).await.unwrap();
    let observed = ObservedStore::new(inner);

    let (handler, mut rx) = collector();
    let sub = observed.subscribe(handler);
    assert!(sub.is_active());

    let first = next(&mut rx).await;
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].message.body.as_deref(), Some("existing"));
}

#[tokio::test]
async fn test_writes_trigger_redelivery_newest_first() {
    let observed = ObservedStore::new(Arc::new(InMemoryStore::new()));
    let (handler, mut rx) = collector();
    let _sub = observed.subscribe(handler);
    assert!(next(&mut rx).await.is_empty());

    observed
        .insert_batch(&batch_of(&["older", "newer"]))
        .await
        .unwrap();
    let snapshot = next(&mut rx).await;
    let bodies: Vec<&str> = snapshot
        .iter()
        .filter_map(|m| m.message.body.as_deref())
        .collect();
    assert_eq!(bodies, vec!["newer", "older"]);

    let id = snapshot[0].message.id.clone();
    assert!(observed.delete_message(&id).await.unwrap());
    assert_eq!(next(&mut rx).await.len(), 1);
}

#[tokio::test]
async fn test_unchanged_writes_do_not_bump_generation() {
    let observed = ObservedStore::new(Arc::new(InMemoryStore::new()));
    let batch = batch_of(&["once"]);

    observed.insert_batch(&batch).await.unwrap();
    assert_eq!(observed.generation(), 1);

    // Duplicate insert and a miss on delete change nothing.
    observed.insert_batch(&batch).await.unwrap();
    assert!(!observed.delete_message("missing").await.unwrap());
    assert_eq!(observed.generation(), 1);

    observed.clear_all().await.unwrap();
    assert_eq!(observed.generation(), 2);
}

#[tokio::test]
async fn test_cancel_stops_delivery() {
    let observed = ObservedStore::new(Arc::new(InMemoryStore::new()));
    let (handler, mut rx) = collector();
    let sub = observed.subscribe(handler);
    next(&mut rx).await;

    sub.cancel();
    observed.insert_batch(&batch_of(&["after"])).await.unwrap();

    // The aborted task drops the handler, closing the channel.
    let closed = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert!(closed.is_none());
}

#[tokio::test]
async fn test_feed_observes_ingestion_run() {
    let observed = Arc::new(ObservedStore::new(Arc::new(InMemoryStore::new())));
    let source = Arc::new(
        DumpSource::from_json_str(
            &json!({
                "sms": [
                    {"_id": 1, "address": "+1555", "body": "one", "date": 10},
                    {"_id": 2, "address": "+1555", "body": "two", "date": 20}
                ]
            })
            .to_string(),
        )
        .unwrap(),
    );
    let extractor = RecordExtractor::new(source, observed.clone(), vec!["rcs".to_string()]);
    let ing = Ingestor::new(observed.clone(), extractor, IngestSettings::default());

    let (handler, mut rx) = collector();
    let _sub = observed.subscribe(handler);
    assert!(next(&mut rx).await.is_empty());

    ing.run_ingestion(Some(Channel::Sms)).await;
    let snapshot = next(&mut rx).await;
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].message.body.as_deref(), Some("two"));
}
