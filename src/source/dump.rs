//! JSON dump source.
//!
//! Reads a provider export shaped like:
//!
//! ```json
//! {
//!   "sms":       [{"_id": 1, "address": "+1555", "body": "hi", "date": 1700000000000}],
//!   "mms":       [{"_id": 7, "date": 1700000000, "ct_t": "application/vnd.wap.multipart.related"}],
//!   "mms_parts": [{"_id": 70, "mid": 7, "seq": 0, "ct": "text/plain", "text": "hello"}],
//!   "mms_addr":  [{"msg_id": 7, "address": "+1555", "type": 137}],
//!   "im_chat":   [{"_id": 1, "address": "+1555", "body": "chat", "date": 1700000000000}],
//!   "part_data": {"71": "<base64 payload>"}
//! }
//! ```
//!
//! Every table is optional. An absent `im_chat` key means the secondary
//! provider does not exist on the exporting device: the probe reports it
//! unavailable and queries against it fail.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{MessageSource, SourceRow, SourceTable};

#[derive(Debug, Default, Deserialize)]
struct DumpFile {
    #[serde(default)]
    sms: Vec<Map<String, Value>>,
    #[serde(default)]
    mms: Vec<Map<String, Value>>,
    #[serde(default)]
    mms_parts: Vec<Map<String, Value>>,
    #[serde(default)]
    mms_addr: Vec<Map<String, Value>>,
    #[serde(default)]
    im_chat: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    part_data: HashMap<String, String>,
}

/// [`MessageSource`] over an in-memory copy of a JSON export.
pub struct DumpSource {
    sms: Vec<SourceRow>,
    mms: Vec<SourceRow>,
    parts: Vec<SourceRow>,
    addresses: Vec<SourceRow>,
    im_chat: Option<Vec<SourceRow>>,
    part_data: HashMap<i64, Vec<u8>>,
}

fn into_rows(maps: Vec<Map<String, Value>>) -> Vec<SourceRow> {
    let mut rows: Vec<SourceRow> = maps.into_iter().map(SourceRow::new).collect();
    rows.sort_by_key(|r| r.long("_id"));
    rows
}

impl DumpSource {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source dump: {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Invalid source dump: {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let dump: DumpFile = serde_json::from_str(content)?;

        let mut part_data = HashMap::new();
        for (id, encoded) in dump.part_data {
            let part_id: i64 = id
                .parse()
                .with_context(|| format!("part_data key is not a part id: '{}'", id))?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .with_context(|| format!("part_data for part {} is not base64", part_id))?;
            part_data.insert(part_id, bytes);
        }

        Ok(Self {
            sms: into_rows(dump.sms),
            mms: into_rows(dump.mms),
            parts: into_rows(dump.mms_parts),
            addresses: dump.mms_addr.into_iter().map(SourceRow::new).collect(),
            im_chat: dump.im_chat.map(into_rows),
            part_data,
        })
    }

    /// A source with no rows and no secondary provider.
    pub fn empty() -> Self {
        Self {
            sms: Vec::new(),
            mms: Vec::new(),
            parts: Vec::new(),
            addresses: Vec::new(),
            im_chat: None,
            part_data: HashMap::new(),
        }
    }

    fn table(&self, table: SourceTable) -> Result<&[SourceRow]> {
        match table {
            SourceTable::Sms => Ok(&self.sms),
            SourceTable::Mms => Ok(&self.mms),
            SourceTable::ImChat => match &self.im_chat {
                Some(rows) => Ok(rows),
                None => bail!("secondary provider is not present in this dump"),
            },
        }
    }
}

#[async_trait]
impl MessageSource for DumpSource {
    async fn query(
        &self,
        table: SourceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRow>> {
        let rows = self.table(table)?;
        Ok(rows
            .iter()
            .filter(|r| match after {
                Some(after) => r.long("_id").is_some_and(|id| id > after),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn parts_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        let mut parts: Vec<SourceRow> = self
            .parts
            .iter()
            .filter(|r| r.long("mid") == Some(owner))
            .cloned()
            .collect();
        parts.sort_by_key(|r| r.long("seq"));
        Ok(parts)
    }

    async fn addresses_for(&self, owner: i64) -> Result<Vec<SourceRow>> {
        Ok(self
            .addresses
            .iter()
            .filter(|r| r.long("msg_id") == Some(owner))
            .cloned()
            .collect())
    }

    async fn open_part(&self, part_id: i64) -> Result<Option<Vec<u8>>> {
        Ok(self.part_data.get(&part_id).cloned())
    }

    async fn probe_secondary(&self) -> Result<bool> {
        Ok(self.im_chat.is_some())
    }
}
