//! Core data models used throughout Relay.
//!
//! A [`CandidateRecord`] is what the record extractor produces from one
//! source row. [`CandidateRecord::normalize`] assigns the content-derived
//! identity and yields the [`Message`], [`Part`]s and [`Address`]es that are
//! accumulated into a [`MessageBatch`] and committed to a store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::identify;

/// Errors raised when decoding persisted model values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("unknown address role: {0}")]
    UnknownRole(String),
    #[error("unknown part kind: {0}")]
    UnknownPartKind(String),
}

/// One of the three independent message categories.
///
/// | Variant | Shape | Extraction |
/// |---------|-------|------------|
/// | [`Channel::Sms`] | single-part | one row, one text body |
/// | [`Channel::Mms`] | multipart | row + parts + addresses sub-queries |
/// | [`Channel::Rcs`] | heuristic | marker match on multipart rows, optional secondary provider |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Sms,
    Mms,
    Rcs,
}

impl Channel {
    /// All channels in ingestion order.
    pub const ALL: [Channel; 3] = [Channel::Sms, Channel::Mms, Channel::Rcs];

    /// Persisted name, also the channel component of the identity hash.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Mms => "MMS",
            Channel::Rcs => "RCS",
        }
    }

    /// Lower-case token used in placeholder addresses (`<mms:42>`).
    pub fn token(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Mms => "mms",
            Channel::Rcs => "rcs",
        }
    }

    /// Placeholder participant for a record with no resolvable address.
    pub fn placeholder_address(&self, row_id: i64) -> String {
        format!("<{}:{}>", self.token(), row_id)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sms" => Ok(Channel::Sms),
            "mms" => Ok(Channel::Mms),
            "rcs" => Ok(Channel::Rcs),
            _ => Err(ModelError::UnknownChannel(s.to_string())),
        }
    }
}

/// Participant role of a multipart address row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressRole {
    From,
    To,
    Cc,
    Bcc,
}

impl AddressRole {
    /// Maps a provider role code. Unrecognized codes yield `None` and the
    /// address row is dropped.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            137 => Some(AddressRole::From),
            151 => Some(AddressRole::To),
            130 => Some(AddressRole::Cc),
            129 => Some(AddressRole::Bcc),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            AddressRole::From => 137,
            AddressRole::To => 151,
            AddressRole::Cc => 130,
            AddressRole::Bcc => 129,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::From => "From",
            AddressRole::To => "To",
            AddressRole::Cc => "Cc",
            AddressRole::Bcc => "Bcc",
        }
    }
}

impl FromStr for AddressRole {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "From" => Ok(AddressRole::From),
            "To" => Ok(AddressRole::To),
            "Cc" => Ok(AddressRole::Cc),
            "Bcc" => Ok(AddressRole::Bcc),
            _ => Err(ModelError::UnknownRole(s.to_string())),
        }
    }
}

pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_SMIL: &str = "application/smil";

/// Lower-cased MIME type without parameters (`"Text/Plain; charset=utf-8"` → `"text/plain"`).
pub fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Coarse classification of a part by MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartKind {
    Text,
    Smil,
    Image,
    Video,
    Audio,
    Other,
}

impl PartKind {
    pub fn from_mime(mime: Option<&str>) -> Self {
        let Some(mime) = mime else {
            return PartKind::Text;
        };
        let mime = essence(mime);
        match mime.as_str() {
            MIME_TEXT_PLAIN => PartKind::Text,
            MIME_SMIL => PartKind::Smil,
            m if m.starts_with("image/") => PartKind::Image,
            m if m.starts_with("video/") => PartKind::Video,
            m if m.starts_with("audio/") => PartKind::Audio,
            _ => PartKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Text => "text",
            PartKind::Smil => "smil",
            PartKind::Image => "image",
            PartKind::Video => "video",
            PartKind::Audio => "audio",
            PartKind::Other => "other",
        }
    }
}

impl FromStr for PartKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(PartKind::Text),
            "smil" => Ok(PartKind::Smil),
            "image" => Ok(PartKind::Image),
            "video" => Ok(PartKind::Video),
            "audio" => Ok(PartKind::Audio),
            "other" => Ok(PartKind::Other),
            _ => Err(ModelError::UnknownPartKind(s.to_string())),
        }
    }
}

/// A part is an attachment iff its MIME type is present and is neither
/// plain text nor presentation markup.
pub fn is_attachment_mime(mime: Option<&str>) -> bool {
    match mime {
        None => false,
        Some(m) => {
            let m = essence(m);
            !m.is_empty() && m != MIME_TEXT_PLAIN && m != MIME_SMIL
        }
    }
}

/// Normalized record of one logical communication event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Content-derived identifier. Empty on a [`CandidateRecord`] until
    /// [`CandidateRecord::normalize`] runs.
    pub id: String,
    pub channel: Channel,
    /// Source-side row identifier; feeds the channel watermark.
    pub source_position: Option<i64>,
    pub conversation_id: Option<i64>,
    /// Primary participant address, or a `<channel:id>` placeholder.
    pub address: String,
    pub body: Option<String>,
    /// Received time, epoch milliseconds.
    pub timestamp: i64,
    pub date_sent: Option<i64>,
    pub read: Option<bool>,
    pub msg_box: Option<i64>,
    pub status: Option<i64>,
    pub service_center: Option<String>,
    pub protocol: Option<i64>,
    pub seen: Option<bool>,
    pub locked: Option<bool>,
    pub error_code: Option<i64>,
    pub subject: Option<String>,
    /// Raw multipart content-type (`ct_t`) kept verbatim.
    pub content_type: Option<String>,
    /// Part ids in presentation order, empty when the record has no SMIL.
    #[serde(default)]
    pub render_order: Vec<String>,
    /// The decoded source row, serialized as JSON.
    pub raw_json: Option<String>,
}

impl Message {
    /// A message with only the identifying fields set.
    pub fn new(channel: Channel, address: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: String::new(),
            channel,
            source_position: None,
            conversation_id: None,
            address: address.into(),
            body: None,
            timestamp,
            date_sent: None,
            read: None,
            msg_box: None,
            status: None,
            service_center: None,
            protocol: None,
            seen: None,
            locked: None,
            error_code: None,
            subject: None,
            content_type: None,
            render_order: Vec::new(),
            raw_json: None,
        }
    }
}

/// Size/type/disposition fields of a part, retained verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub size: Option<String>,
    pub transfer_type: Option<String>,
    pub disposition: Option<String>,
}

/// One sub-part of a multipart message.
///
/// Exactly one of `text` / `stored_path` is populated: attachments have
/// their payload externalized to the store's blob area, inline parts keep
/// their text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub part_id: String,
    /// Owning message. Empty until the candidate is normalized.
    pub message_id: String,
    pub seq: Option<i64>,
    pub content_type: Option<String>,
    pub kind: PartKind,
    pub is_attachment: bool,
    pub text: Option<String>,
    pub stored_path: Option<String>,
    pub name: Option<String>,
    pub filename: Option<String>,
    pub charset: Option<String>,
    pub content_id: Option<String>,
    pub content_location: Option<String>,
    pub transfer: TransferMetadata,
}

impl Part {
    /// `filename`, falling back to `name`.
    pub fn best_filename(&self) -> Option<&str> {
        self.filename.as_deref().or(self.name.as_deref())
    }

    pub fn is_image(&self) -> bool {
        self.kind == PartKind::Image
    }
}

/// A participant address of a multipart message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub message_id: String,
    pub address: String,
    pub role: AddressRole,
    pub charset: Option<String>,
}

/// A message joined with its parts and addresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageWithParts {
    pub message: Message,
    pub parts: Vec<Part>,
    pub addresses: Vec<Address>,
}

/// Record produced by the extractor, not yet identified.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRecord {
    pub message: Message,
    pub parts: Vec<Part>,
    pub addresses: Vec<Address>,
}

/// A candidate after identity assignment, ready to be batched.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub message: Message,
    pub parts: Vec<Part>,
    pub addresses: Vec<Address>,
}

impl CandidateRecord {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            parts: Vec::new(),
            addresses: Vec::new(),
        }
    }

    /// Assigns the content-derived id and propagates it to parts and addresses.
    pub fn normalize(self) -> NormalizedRecord {
        let mut message = self.message;
        message.id = identify(
            message.channel,
            Some(message.address.as_str()),
            message.body.as_deref(),
            message.timestamp,
        );
        let parts = self
            .parts
            .into_iter()
            .map(|mut p| {
                p.message_id = message.id.clone();
                p
            })
            .collect();
        let addresses = self
            .addresses
            .into_iter()
            .map(|mut a| {
                a.message_id = message.id.clone();
                a
            })
            .collect();
        NormalizedRecord {
            message,
            parts,
            addresses,
        }
    }
}

/// In-memory accumulation of normalized entities awaiting one store commit.
#[derive(Debug, Clone, Default)]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    pub parts: Vec<Part>,
    pub addresses: Vec<Address>,
}

impl MessageBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: NormalizedRecord) {
        self.messages.push(record.message);
        self.parts.extend(record.parts);
        self.addresses.extend(record.addresses);
    }

    /// Number of messages in the batch.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Moves the contents out, leaving the batch empty.
    pub fn take(&mut self) -> MessageBatch {
        std::mem::take(self)
    }
}
