//! In-memory [`MessageStore`] implementation for testing and embedding.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Blobs are kept in a map and addressed as `memory://<key>`.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Address, AddressRole, Channel, Message, MessageBatch, MessageWithParts, Part};

use super::{BatchOutcome, MessageStore};

#[derive(Default)]
struct Tables {
    messages: HashMap<String, Message>,
    parts: Vec<Part>,
    part_ids: HashSet<String>,
    addresses: Vec<Address>,
    address_keys: HashSet<(String, String, AddressRole)>,
}

/// In-memory store.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    meta: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            blobs: RwLock::new(HashMap::new()),
            meta: RwLock::new(HashMap::new()),
        }
    }

    /// Payload previously stored with [`MessageStore::put_blob`].
    pub fn blob(&self, path: &str) -> Option<Vec<u8>> {
        let key = path.strip_prefix("memory://").unwrap_or(path);
        self.blobs.read().unwrap().get(key).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.tables.read().unwrap().messages.len()
    }

    pub fn part_count(&self) -> usize {
        self.tables.read().unwrap().parts.len()
    }

    pub fn address_count(&self) -> usize {
        self.tables.read().unwrap().addresses.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(a: &Message, b: &Message) -> std::cmp::Ordering {
    b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert_batch(&self, batch: &MessageBatch) -> Result<BatchOutcome> {
        let mut tables = self.tables.write().unwrap();

        // Reject the whole batch before any table is touched.
        let known = |id: &str| {
            tables.messages.contains_key(id) || batch.messages.iter().any(|m| m.id == id)
        };
        if let Some(part) = batch.parts.iter().find(|p| !known(&p.message_id)) {
            anyhow::bail!(
                "part {} references unknown message {}",
                part.part_id,
                part.message_id
            );
        }
        if let Some(addr) = batch.addresses.iter().find(|a| !known(&a.message_id)) {
            anyhow::bail!(
                "address {} references unknown message {}",
                addr.address,
                addr.message_id
            );
        }

        let mut outcome = BatchOutcome::default();
        for msg in &batch.messages {
            if !tables.messages.contains_key(&msg.id) {
                tables.messages.insert(msg.id.clone(), msg.clone());
                outcome.messages += 1;
            }
        }
        for part in &batch.parts {
            if tables.part_ids.insert(part.part_id.clone()) {
                tables.parts.push(part.clone());
                outcome.parts += 1;
            }
        }
        for addr in &batch.addresses {
            let key = (addr.message_id.clone(), addr.address.clone(), addr.role);
            if tables.address_keys.insert(key) {
                tables.addresses.push(addr.clone());
                outcome.addresses += 1;
            }
        }
        Ok(outcome)
    }

    async fn max_source_position(&self, channel: Channel) -> Result<Option<i64>> {
        let tables = self.tables.read().unwrap();
        Ok(tables
            .messages
            .values()
            .filter(|m| m.channel == channel)
            .filter_map(|m| m.source_position)
            .max())
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        let tables = self.tables.read().unwrap();
        let mut out: Vec<Message> = tables.messages.values().cloned().collect();
        out.sort_by(newest_first);
        Ok(out)
    }

    async fn messages_with_parts(&self) -> Result<Vec<MessageWithParts>> {
        let tables = self.tables.read().unwrap();
        let mut msgs: Vec<&Message> = tables.messages.values().collect();
        msgs.sort_by(|a, b| newest_first(a, b));
        Ok(msgs
            .into_iter()
            .map(|m| {
                let mut parts: Vec<Part> = tables
                    .parts
                    .iter()
                    .filter(|p| p.message_id == m.id)
                    .cloned()
                    .collect();
                parts.sort_by_key(|p| p.seq);
                let addresses = tables
                    .addresses
                    .iter()
                    .filter(|a| a.message_id == m.id)
                    .cloned()
                    .collect();
                MessageWithParts {
                    message: m.clone(),
                    parts,
                    addresses,
                }
            })
            .collect())
    }

    async fn delete_message(&self, id: &str) -> Result<bool> {
        let mut tables = self.tables.write().unwrap();
        if tables.messages.remove(id).is_none() {
            return Ok(false);
        }
        let Tables {
            parts,
            part_ids,
            addresses,
            address_keys,
            ..
        } = &mut *tables;
        parts.retain(|p| {
            let keep = p.message_id != id;
            if !keep {
                part_ids.remove(&p.part_id);
            }
            keep
        });
        addresses.retain(|a| a.message_id != id);
        address_keys.retain(|(mid, _, _)| mid != id);
        Ok(true)
    }

    async fn clear_all(&self) -> Result<()> {
        *self.tables.write().unwrap() = Tables::default();
        Ok(())
    }

    async fn put_blob(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.blobs
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", key))
    }

    async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.meta.read().unwrap().get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.meta
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        self.meta.write().unwrap().remove(key);
        Ok(())
    }
}
