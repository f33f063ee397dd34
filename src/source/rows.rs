//! Typed decoders for provider rows.
//!
//! Each decoder reads the columns it knows about and leaves the rest to
//! `raw_json`. A row without its identifying column decodes to `None`.

use relay_core::models::AddressRole;

use super::SourceRow;

/// Single-part message row.
#[derive(Debug, Clone, PartialEq)]
pub struct SmsRow {
    pub id: i64,
    pub thread_id: Option<i64>,
    pub address: Option<String>,
    pub body: Option<String>,
    pub date: Option<i64>,
    pub date_sent: Option<i64>,
    pub read: Option<bool>,
    pub msg_type: Option<i64>,
    pub status: Option<i64>,
    pub service_center: Option<String>,
    pub protocol: Option<i64>,
    pub seen: Option<bool>,
    pub locked: Option<bool>,
    pub error_code: Option<i64>,
    pub subject: Option<String>,
}

impl SmsRow {
    pub fn decode(row: &SourceRow) -> Option<Self> {
        Some(Self {
            id: row.long("_id")?,
            thread_id: row.long("thread_id"),
            address: row.text("address"),
            body: row.text("body"),
            date: row.long("date"),
            date_sent: row.long("date_sent"),
            read: row.flag("read"),
            msg_type: row.long("type"),
            status: row.long("status"),
            service_center: row.text("service_center"),
            protocol: row.long("protocol"),
            seen: row.flag("seen"),
            locked: row.flag("locked"),
            error_code: row.long("error_code"),
            subject: row.text("subject"),
        })
    }
}

/// Multipart message header row.
#[derive(Debug, Clone, PartialEq)]
pub struct MmsRow {
    pub id: i64,
    pub thread_id: Option<i64>,
    pub date: Option<i64>,
    pub date_sent: Option<i64>,
    pub read: Option<bool>,
    pub msg_box: Option<i64>,
    pub subject: Option<String>,
    /// Declared content type (`ct_t`).
    pub content_type: Option<String>,
    pub seen: Option<bool>,
    pub locked: Option<bool>,
    pub status: Option<i64>,
}

impl MmsRow {
    pub fn decode(row: &SourceRow) -> Option<Self> {
        Some(Self {
            id: row.long("_id")?,
            thread_id: row.long("thread_id"),
            date: row.long("date"),
            date_sent: row.long("date_sent"),
            read: row.flag("read"),
            msg_box: row.long("msg_box"),
            subject: row.text("sub"),
            content_type: row.text("ct_t"),
            seen: row.flag("seen"),
            locked: row.flag("locked"),
            status: row.long("st"),
        })
    }

    /// Case-insensitive substring match of `ct_t` against any marker.
    pub fn matches_any(&self, markers: &[String]) -> bool {
        let Some(ct) = &self.content_type else {
            return false;
        };
        let ct = ct.to_ascii_lowercase();
        markers
            .iter()
            .any(|m| ct.contains(&m.to_ascii_lowercase()))
    }
}

/// Sub-part of a multipart message.
#[derive(Debug, Clone, PartialEq)]
pub struct PartRow {
    pub id: i64,
    pub owner: Option<i64>,
    pub seq: Option<i64>,
    pub content_type: Option<String>,
    pub text: Option<String>,
    pub name: Option<String>,
    pub charset: Option<String>,
    pub content_id: Option<String>,
    pub content_location: Option<String>,
    pub ctt_s: Option<String>,
    pub ctt_t: Option<String>,
    pub disposition: Option<String>,
    pub filename: Option<String>,
}

impl PartRow {
    pub fn decode(row: &SourceRow) -> Option<Self> {
        Some(Self {
            id: row.long("_id")?,
            owner: row.long("mid"),
            seq: row.long("seq"),
            content_type: row.text("ct"),
            text: row.text("text"),
            name: row.text("name"),
            charset: row.text("chset"),
            content_id: row.text("cid"),
            content_location: row.text("cl"),
            ctt_s: row.text("ctt_s"),
            ctt_t: row.text("ctt_t"),
            disposition: row.text("cd"),
            filename: row.text("fn"),
        })
    }
}

/// Participant row of a multipart message.
#[derive(Debug, Clone, PartialEq)]
pub struct AddrRow {
    pub address: String,
    /// `None` when the role code is missing or unrecognized.
    pub role: Option<AddressRole>,
    pub charset: Option<String>,
}

impl AddrRow {
    pub fn decode(row: &SourceRow) -> Option<Self> {
        let address = row.text("address").filter(|a| !a.trim().is_empty())?;
        Some(Self {
            address,
            role: row.long("type").and_then(AddressRole::from_code),
            charset: row.text("charset"),
        })
    }
}

/// Secondary chat provider row.
#[derive(Debug, Clone, PartialEq)]
pub struct ImRow {
    pub id: i64,
    pub address: Option<String>,
    pub body: Option<String>,
    pub date: Option<i64>,
    pub thread_id: Option<i64>,
}

impl ImRow {
    pub fn decode(row: &SourceRow) -> Option<Self> {
        Some(Self {
            id: row.long("_id")?,
            address: row.text("address"),
            body: row.text("body"),
            date: row.long("date"),
            thread_id: row.long("thread_id"),
        })
    }
}
