//! Message source abstraction.
//!
//! A [`MessageSource`] is the external provider Relay ingests from. It
//! exposes three row tables ([`SourceTable`]), two per-owner sub-queries for
//! multipart messages, payload access for attachment parts, and an
//! availability probe for the secondary chat table.
//!
//! Rows are untyped column maps ([`SourceRow`]). The decoders in [`rows`]
//! turn them into typed structs whose fields are `Option`s, so a missing
//! column is an ordinary absent value rather than a failure.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`dump::DumpSource`] | JSON export of a provider, used by the CLI and tests |

pub mod dump;
pub mod rows;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Row tables exposed by a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTable {
    /// Single-part text messages.
    Sms,
    /// Multipart message headers.
    Mms,
    /// Secondary chat provider, only present on some installations.
    ImChat,
}

impl SourceTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTable::Sms => "sms",
            SourceTable::Mms => "mms",
            SourceTable::ImChat => "im_chat",
        }
    }
}

/// External provider of raw message rows.
///
/// Every query re-reads the provider; nothing is held open across calls.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Rows of `table` with `_id > after` (all rows when `after` is `None`),
    /// ascending by `_id`, at most `limit` of them.
    async fn query(
        &self,
        table: SourceTable,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SourceRow>>;

    /// Part rows of the multipart message with row id `owner`.
    async fn parts_for(&self, owner: i64) -> Result<Vec<SourceRow>>;

    /// Address rows of the multipart message with row id `owner`.
    async fn addresses_for(&self, owner: i64) -> Result<Vec<SourceRow>>;

    /// Binary payload of a part, `None` if the provider has none.
    async fn open_part(&self, part_id: i64) -> Result<Option<Vec<u8>>>;

    /// Whether the secondary chat table can be read at all.
    async fn probe_secondary(&self) -> Result<bool>;
}

/// One raw provider row: column name to JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow(Map<String, Value>);

impl SourceRow {
    pub fn new(columns: Map<String, Value>) -> Self {
        Self(columns)
    }

    /// Builds a row from a JSON object; any other value yields `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn columns(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Integer column. Numeric strings are accepted, as providers are loose
    /// about column affinity.
    pub fn long(&self, column: &str) -> Option<i64> {
        match self.0.get(column)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn text(&self, column: &str) -> Option<String> {
        match self.0.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Boolean column stored either as a JSON bool or as 0/1.
    pub fn flag(&self, column: &str) -> Option<bool> {
        match self.0.get(column)? {
            Value::Bool(b) => Some(*b),
            _ => self.long(column).map(|v| v != 0),
        }
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<Map<String, Value>> for SourceRow {
    fn from(columns: Map<String, Value>) -> Self {
        Self(columns)
    }
}
